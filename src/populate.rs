//! # Populate Driver
//!
//! Works through every definition in the target namespace: loads and
//! annotates them, orders literal-only definitions before composed ones, and
//! resolves each under a per-definition retry budget.
//!
//! Failure isolation is the core contract here. A malformed entry, a fatal
//! template error, or an exhausted retry budget fails that one definition;
//! the rest of the batch still runs, and the [`RunReport`] carries every
//! outcome with its reason.

use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::RetryPolicy;
use crate::crd::BackendType;
use crate::error::{Error, Result};
use crate::extsecrets::DefinitionSource;
use crate::resolver::{self, SourceSnapshot};
use crate::schemas::{self, Definition, Schema};
use crate::store::{SecretStore, SecretStoreFactory};

/// Configuration for one populate run. Everything with behavior behind it is
/// injected so tests can run the full loop against fakes.
pub struct Options {
    pub source: Arc<dyn DefinitionSource>,
    pub factory: Arc<dyn SecretStoreFactory>,
    /// Namespace the definitions live in
    pub namespace: String,
    /// Namespace holding the source secrets templates and literal copies
    /// read; defaults to `namespace`
    pub boot_secret_namespace: Option<String>,
    /// Schema document with defaults, generators and templates
    pub schema_file: Option<PathBuf>,
    /// Single attempt per definition, no waiting
    pub no_wait: bool,
    pub backoff: RetryPolicy,
    pub cancel: CancellationToken,
}

/// Terminal state of one definition after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionState {
    /// At least one changed value written, every reference satisfied
    Written,
    /// Nothing needed writing
    Skipped,
    /// Budget exhausted, terminal error, or the run was cancelled before the
    /// definition settled
    Failed,
}

#[derive(Debug)]
pub struct DefinitionOutcome {
    pub name: String,
    pub state: DefinitionState,
    pub reason: Option<String>,
    pub attempts: u32,
    /// Values written across all attempts
    pub written: usize,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<DefinitionOutcome>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| o.state == DefinitionState::Failed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &DefinitionOutcome> {
        self.outcomes.iter().filter(|o| o.state == DefinitionState::Failed)
    }

    pub fn written(&self) -> usize {
        self.outcomes.iter().map(|o| o.written).sum()
    }
}

impl Options {
    /// Run one populate pass over the namespace.
    pub async fn run(&self) -> Result<RunReport> {
        let schema = match self.schema_file {
            Some(ref path) => schemas::load_schema_file(path)?,
            None => Schema::default(),
        };

        let loaded = self.source.load(&self.namespace).await?;
        let annotated = schemas::annotate(loaded, &schema);

        let mut report = RunReport::default();
        let mut literal = Vec::new();
        let mut composed = Vec::new();
        for entry in annotated {
            match entry {
                Ok(definition) if definition.has_composed_fields() => composed.push(definition),
                Ok(definition) => literal.push(definition),
                Err(e) => {
                    warn!(error = %e, "skipping malformed definition");
                    report.outcomes.push(DefinitionOutcome {
                        name: malformed_name(&e),
                        state: DefinitionState::Failed,
                        reason: Some(e.to_string()),
                        attempts: 0,
                        written: 0,
                    });
                }
            }
        }
        info!(
            namespace = %self.namespace,
            literal = literal.len(),
            composed = composed.len(),
            "populating definitions"
        );

        let source_namespace =
            self.boot_secret_namespace.clone().unwrap_or_else(|| self.namespace.clone());
        let source_store = self
            .factory
            .create(BackendType::Kubernetes, &source_namespace)
            .await
            .map_err(Error::from)?;

        // Literal-only definitions first: composed definitions read the
        // secrets this phase writes.
        for definition in literal.into_iter().chain(composed) {
            // A definition never attempted because the run was cancelled is a
            // failure, not a skip, so a cancelled run exits non-zero.
            if self.cancel.is_cancelled() {
                report.outcomes.push(DefinitionOutcome {
                    name: definition.name,
                    state: DefinitionState::Failed,
                    reason: Some("run cancelled".to_string()),
                    attempts: 0,
                    written: 0,
                });
                continue;
            }
            let outcome = self
                .populate_definition(&definition, source_store.as_ref(), &source_namespace)
                .await;
            report.outcomes.push(outcome);
        }

        Ok(report)
    }

    async fn populate_definition(
        &self,
        definition: &Definition,
        source_store: &dyn SecretStore,
        source_namespace: &str,
    ) -> DefinitionOutcome {
        let destination = match self.factory.create(definition.backend, &definition.location).await
        {
            Ok(store) => store,
            Err(e) => {
                return DefinitionOutcome {
                    name: definition.name.clone(),
                    state: DefinitionState::Failed,
                    reason: Some(format!("creating {} store: {e}", definition.backend)),
                    attempts: 0,
                    written: 0,
                }
            }
        };

        let policy = if self.no_wait { RetryPolicy::no_wait() } else { self.backoff.clone() };
        let mut delays = policy.delays();
        let mut attempts = 0;
        let mut written = 0;
        let mut last_reason = String::new();

        loop {
            attempts += 1;
            match self
                .attempt(definition, source_store, source_namespace, destination.as_ref())
                .await
            {
                Ok(AttemptOutcome { written: attempt_written, unresolved }) => {
                    written += attempt_written;
                    if unresolved.is_empty() {
                        let state = if written > 0 {
                            DefinitionState::Written
                        } else {
                            DefinitionState::Skipped
                        };
                        debug!(definition = %definition.name, attempts, written, "definition settled");
                        return DefinitionOutcome {
                            name: definition.name.clone(),
                            state,
                            reason: None,
                            attempts,
                            written,
                        };
                    }
                    last_reason = Error::UnsatisfiedDependency {
                        name: definition.name.clone(),
                        fields: unresolved,
                    }
                    .to_string();
                }
                Err(e) if e.is_retryable() => {
                    warn!(definition = %definition.name, error = %e, "attempt failed, retrying");
                    last_reason = e.to_string();
                }
                Err(e) => {
                    return DefinitionOutcome {
                        name: definition.name.clone(),
                        state: DefinitionState::Failed,
                        reason: Some(e.to_string()),
                        attempts,
                        written,
                    }
                }
            }

            let Some(delay) = delays.next() else {
                return DefinitionOutcome {
                    name: definition.name.clone(),
                    state: DefinitionState::Failed,
                    reason: Some(last_reason),
                    attempts,
                    written,
                };
            };
            debug!(definition = %definition.name, ?delay, "waiting before next attempt");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    return DefinitionOutcome {
                        name: definition.name.clone(),
                        state: DefinitionState::Failed,
                        reason: Some(format!("cancelled while waiting; {last_reason}")),
                        attempts,
                        written,
                    };
                }
            }
        }
    }

    /// One attempt: fresh source snapshot, resolve, write what changed.
    async fn attempt(
        &self,
        definition: &Definition,
        source_store: &dyn SecretStore,
        source_namespace: &str,
        destination: &dyn SecretStore,
    ) -> Result<AttemptOutcome> {
        let snapshot = SourceSnapshot::capture(source_store, source_namespace).await?;
        let resolution = resolver::resolve(definition, destination, Arc::new(snapshot)).await?;

        let mut written = 0;
        for value in &resolution.values {
            destination
                .set_value(&value.location, &value.scope, &value.property, &value.value)
                .await?;
            written += 1;
        }
        if written > 0 {
            info!(
                definition = %definition.name,
                backend = %definition.backend,
                written,
                unchanged = resolution.unchanged,
                "wrote secret values"
            );
        }
        Ok(AttemptOutcome { written, unresolved: resolution.unresolved })
    }
}

struct AttemptOutcome {
    written: usize,
    unresolved: Vec<String>,
}

fn malformed_name(error: &Error) -> String {
    match error {
        Error::MalformedDefinition { name, .. } => name.clone(),
        _ => "<unparsed>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{DataMapping, ExternalSecret, ExternalSecretSpec};
    use crate::error::{Error, StoreError};
    use crate::extsecrets::DefinitionSource;
    use crate::store::fake::{FakeSecretStore, FakeSecretStoreFactory};
    use async_trait::async_trait;
    use kube::core::ObjectMeta;
    use std::time::Duration;

    struct StaticSource(Vec<ExternalSecret>);

    #[async_trait]
    impl DefinitionSource for StaticSource {
        async fn load(
            &self,
            _namespace: &str,
        ) -> Result<Vec<Result<ExternalSecret, Error>>, Error> {
            Ok(self.0.clone().into_iter().map(Ok).collect())
        }
    }

    fn literal_copy(name: &str, source_key: &str) -> ExternalSecret {
        ExternalSecret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("platform".to_string()),
                ..Default::default()
            },
            spec: ExternalSecretSpec {
                backend_type: crate::crd::BackendType::Kubernetes,
                project_id: None,
                key_vault_name: None,
                vault_mount_point: None,
                vault_role: None,
                data: vec![DataMapping {
                    name: "token".to_string(),
                    key: None,
                    property: "token".to_string(),
                    source_key: Some(source_key.to_string()),
                    source_property: Some("password".to_string()),
                }],
            },
        }
    }

    fn options(store: &std::sync::Arc<FakeSecretStore>, secrets: Vec<ExternalSecret>) -> Options {
        Options {
            source: Arc::new(StaticSource(secrets)),
            factory: Arc::new(FakeSecretStoreFactory::new(Arc::clone(store))),
            namespace: "platform".to_string(),
            boot_secret_namespace: None,
            schema_file: None,
            no_wait: false,
            backoff: RetryPolicy {
                steps: 3,
                duration: Duration::ZERO,
                factor: 2.0,
                jitter: 0.0,
            },
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_literal_copy_written_once_then_skipped() {
        let store = FakeSecretStore::new();
        store.seed("platform", "platform-boot", "password", "boot-pw");
        let opts = options(&store, vec![literal_copy("pipeline-user", "platform-boot")]);

        let report = opts.run().await.unwrap();
        assert!(!report.has_failures());
        assert_eq!(report.outcomes[0].state, DefinitionState::Written);
        store.assert_value_equals("platform", "pipeline-user", "token", "boot-pw");

        let rerun = opts.run().await.unwrap();
        assert_eq!(rerun.outcomes[0].state, DefinitionState::Skipped);
    }

    #[tokio::test]
    async fn test_retry_budget_bounds_attempts() {
        let store = FakeSecretStore::new();
        let opts = options(&store, vec![literal_copy("pipeline-user", "never-created")]);

        let report = opts.run().await.unwrap();
        assert!(report.has_failures());
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.state, DefinitionState::Failed);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.reason.as_deref().unwrap().contains("token"));
    }

    #[tokio::test]
    async fn test_no_wait_forces_single_attempt() {
        let store = FakeSecretStore::new();
        let mut opts = options(&store, vec![literal_copy("pipeline-user", "never-created")]);
        opts.no_wait = true;

        let report = opts.run().await.unwrap();
        assert_eq!(report.outcomes[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_failed_definition_does_not_abort_batch() {
        let store = FakeSecretStore::new();
        store.seed("platform", "platform-boot", "password", "boot-pw");
        let opts = options(
            &store,
            vec![
                literal_copy("broken", "never-created"),
                literal_copy("pipeline-user", "platform-boot"),
            ],
        );

        let report = opts.run().await.unwrap();
        assert!(report.has_failures());
        assert_eq!(report.outcomes.len(), 2);
        store.assert_value_equals("platform", "pipeline-user", "token", "boot-pw");
    }

    #[tokio::test]
    async fn test_cancelled_run_fails_unattempted_definitions() {
        let store = FakeSecretStore::new();
        store.seed("platform", "platform-boot", "password", "boot-pw");
        let mut opts = options(&store, vec![literal_copy("pipeline-user", "platform-boot")]);
        opts.cancel = CancellationToken::new();
        opts.cancel.cancel();

        let report = opts.run().await.unwrap();
        assert!(report.has_failures());
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.state, DefinitionState::Failed);
        assert_eq!(outcome.reason.as_deref(), Some("run cancelled"));
        assert_eq!(outcome.attempts, 0);
        store.assert_no_value("platform", "pipeline-user", "token");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff_wait() {
        let store = FakeSecretStore::new();
        let mut opts = options(&store, vec![literal_copy("pipeline-user", "never-created")]);
        opts.backoff = RetryPolicy {
            steps: 3,
            duration: Duration::from_secs(30),
            factor: 2.0,
            jitter: 0.0,
        };
        let cancel = opts.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let report = opts.run().await.unwrap();
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.state, DefinitionState::Failed);
        // Cancelled during the first 30s wait, well before it elapsed.
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.reason.as_deref().unwrap().starts_with("cancelled while waiting"));
        store.assert_no_value("platform", "pipeline-user", "token");
    }

    #[tokio::test]
    async fn test_transport_fault_consumes_retry_step_then_succeeds() {
        let store = FakeSecretStore::new();
        store.seed("platform", "platform-boot", "password", "boot-pw");
        store.fail_next_read(StoreError::transport("kubernetes", "connection reset"));
        let opts = options(&store, vec![literal_copy("pipeline-user", "platform-boot")]);

        let report = opts.run().await.unwrap();
        assert!(!report.has_failures());
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.state, DefinitionState::Written);
        assert_eq!(outcome.attempts, 2);
        store.assert_value_equals("platform", "pipeline-user", "token", "boot-pw");
    }

    #[tokio::test]
    async fn test_persistent_transport_fault_exhausts_budget() {
        let store = FakeSecretStore::new();
        store.seed("platform", "platform-boot", "password", "boot-pw");
        for _ in 0..3 {
            store.fail_next_read(StoreError::transport("kubernetes", "connection reset"));
        }
        let opts = options(&store, vec![literal_copy("pipeline-user", "platform-boot")]);

        let report = opts.run().await.unwrap();
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.state, DefinitionState::Failed);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.reason.as_deref().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_write_conflict_is_terminal() {
        let store = FakeSecretStore::new();
        store.seed("platform", "platform-boot", "password", "boot-pw");
        store.fail_next_write(StoreError::WriteConflict {
            backend: "kubernetes",
            scope: "pipeline-user".to_string(),
            property: "token".to_string(),
            message: "admission webhook denied the request".to_string(),
        });
        let opts = options(&store, vec![literal_copy("pipeline-user", "platform-boot")]);

        let report = opts.run().await.unwrap();
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.state, DefinitionState::Failed);
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.reason.as_deref().unwrap().contains("rejected write"));
    }
}
