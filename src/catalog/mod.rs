//! Capability catalog: recipes that turn an ordinary remote binary into a
//! file reader, a file writer or a shell.
//!
//! Entry order is the preference order and is preserved from the data file.

use crate::config::TransportConfig;
use crate::errors::TransportError;
use crate::resolver::{BinaryLocator, MethodParams};
use crate::utils::quote::quote;
use crate::utils::template::{placeholders, render};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const BUILTIN_CATALOG: &str = include_str!("../../data/methods.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Read,
    Write,
    Shell,
}

/// `Raw` methods are binary safe; `Print` methods may normalize line endings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Raw,
    Print,
}

pub const ANY_STREAM: &[StreamKind] = &[StreamKind::Raw, StreamKind::Print];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub binary: String,
    pub capability: Capability,
    pub stream: StreamKind,
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privileged_payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMethod {
    pub name: String,
    pub binary_path: String,
    pub capability: Capability,
    pub stream: StreamKind,
    pub command: String,
    pub input: Option<Vec<u8>>,
    pub exit: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Ready(ResolvedMethod),
    MissingBinary(String),
    /// The entry needs a parameter the caller did not supply.
    Inapplicable(String),
}

impl CatalogEntry {
    fn template(&self, privileged: bool) -> &str {
        match (privileged, self.privileged_payload.as_deref()) {
            (true, Some(payload)) => payload,
            _ => &self.payload,
        }
    }

    fn templates<'a>(&'a self, privileged: bool) -> impl Iterator<Item = &'a str> {
        std::iter::once(self.template(privileged))
            .chain(self.input.as_deref())
            .chain(self.exit.as_deref())
    }

    /// Parameters are checked before the binary is probed so an inapplicable
    /// entry never costs a round trip.
    pub fn build(
        &self,
        locator: &mut dyn BinaryLocator,
        params: &MethodParams,
    ) -> Result<BuildOutcome, TransportError> {
        let mut vars: BTreeMap<&str, String> = BTreeMap::new();
        if let Some(path) = params.path.as_deref() {
            vars.insert("lfile", quote(path));
        }
        if let Some(length) = params.length {
            vars.insert("length", length.to_string());
        }
        vars.insert("shell", quote(&params.shell));

        for template in self.templates(params.privileged) {
            for name in placeholders(template) {
                if name != "path" && !vars.contains_key(name.as_str()) {
                    return Ok(BuildOutcome::Inapplicable(format!(
                        "{} requires '{}'",
                        self.name, name
                    )));
                }
            }
        }

        let Some(binary_path) = locator.locate(&self.binary)? else {
            return Ok(BuildOutcome::MissingBinary(self.binary.clone()));
        };
        vars.insert("path", quote(&binary_path));

        let command = render(self.template(params.privileged), &vars)?;
        let input = self
            .input
            .as_deref()
            .map(|t| render(t, &vars).map(String::into_bytes))
            .transpose()?;
        let exit = self
            .exit
            .as_deref()
            .map(|t| render(t, &vars).map(String::into_bytes))
            .transpose()?;

        Ok(BuildOutcome::Ready(ResolvedMethod {
            name: self.name.clone(),
            binary_path,
            capability: self.capability,
            stream: self.stream,
            command,
            input,
            exit,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn from_json(raw: &str) -> Result<Self, TransportError> {
        let entries: Vec<CatalogEntry> = serde_json::from_str(raw).map_err(|err| {
            TransportError::invalid_params(format!("invalid method catalog: {}", err))
        })?;
        Ok(Self { entries })
    }

    pub fn builtin() -> Result<Self, TransportError> {
        Self::from_json(BUILTIN_CATALOG)
    }

    pub fn load(path: &Path) -> Result<Self, TransportError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            TransportError::invalid_params(format!(
                "cannot read method catalog {}: {}",
                path.display(),
                err
            ))
        })?;
        Self::from_json(&raw)
    }

    pub fn for_config(config: &TransportConfig) -> Result<Self, TransportError> {
        match config.catalog_path.as_deref() {
            Some(path) => Self::load(path),
            None => Self::builtin(),
        }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn iter<'a>(
        &'a self,
        capability: Capability,
        streams: &'a [StreamKind],
    ) -> impl Iterator<Item = &'a CatalogEntry> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.capability == capability && streams.contains(&e.stream))
    }
}
