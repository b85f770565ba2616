//! Params command implementation for Quill CLI.

use std::fmt::Display;
use std::sync::Arc;

use quill_core::{Error, HttpObjectStore, ParameterInjector, Result, Storage};

/// Print the current value of each named parameter.
pub async fn execute(notebook: &str, names: &[String], s3_endpoint: &str) -> anyhow::Result<()> {
    let storage = Storage::new(Arc::new(HttpObjectStore::new(s3_endpoint)));
    let document = storage.load_document(notebook).await?;
    let injector = ParameterInjector::python()?;

    for name in names {
        println!("{}", describe(name, injector.extract(&document, name))?);
    }
    Ok(())
}

/// One output line; a missing or non-literal assignment does not stop the listing.
fn describe(name: &str, value: Result<Option<impl Display>>) -> Result<String> {
    match value {
        Ok(Some(value)) => Ok(format!("{name} = {value}")),
        Ok(None) => Ok(format!("{name} = <not found>")),
        Err(Error::NotALiteral { .. }) => Ok(format!("{name} = <not a literal>")),
        Err(err) => Err(err),
    }
}
