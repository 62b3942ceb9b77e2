use crate::catalog::{BuildOutcome, Capability, Catalog, ResolvedMethod, StreamKind};
use crate::constants::posix;
use crate::errors::TransportError;
use crate::services::logger::Logger;
use std::sync::Arc;

/// Answers "where is this binary on the target", `None` when absent.
pub trait BinaryLocator {
    fn locate(&mut self, name: &str) -> Result<Option<String>, TransportError>;
}

#[derive(Debug, Clone)]
pub struct MethodParams {
    pub path: Option<String>,
    pub length: Option<u64>,
    pub privileged: bool,
    pub shell: String,
}

impl MethodParams {
    pub fn new() -> Self {
        Self {
            path: None,
            length: None,
            privileged: false,
            shell: posix::SHELL.to_string(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

impl Default for MethodParams {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct Resolver {
    catalog: Arc<Catalog>,
    logger: Logger,
}

impl Resolver {
    pub fn new(catalog: Arc<Catalog>, logger: &Logger) -> Self {
        Self {
            catalog,
            logger: logger.child("resolver"),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// First entry (in catalog order) whose binary exists and whose
    /// templates can be filled wins. Later entries are never probed.
    pub fn resolve(
        &self,
        capability: Capability,
        streams: &[StreamKind],
        params: &MethodParams,
        locator: &mut dyn BinaryLocator,
    ) -> Result<ResolvedMethod, TransportError> {
        let mut skipped: Vec<String> = Vec::new();
        for entry in self.catalog.iter(capability, streams) {
            match entry.build(locator, params)? {
                BuildOutcome::Ready(method) => {
                    self.logger.debug(
                        "method selected",
                        Some(&serde_json::json!({
                            "capability": capability,
                            "method": method.name,
                            "binary": method.binary_path,
                            "skipped": skipped,
                        })),
                    );
                    return Ok(method);
                }
                BuildOutcome::MissingBinary(binary) => {
                    skipped.push(format!("{}: missing {}", entry.name, binary));
                }
                BuildOutcome::Inapplicable(reason) => skipped.push(reason),
            }
        }
        Err(TransportError::no_suitable_method(format!(
            "no usable {:?} method on target",
            capability
        ))
        .with_hint("Install one of the catalog binaries or extend the catalog via SHELLWIRE_CATALOG_PATH.")
        .with_details(serde_json::json!({ "skipped": skipped })))
    }
}
