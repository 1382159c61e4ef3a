//! Mutations always go to the network; their responses are normalized into
//! the cache so every observer of a touched entity refreshes.

use quarry_core::{DocumentArtifact, QuarryError, QuarryResult, Variables};
use serde_json::Value;

use crate::client::Client;
use crate::context::ExecutionContext;
use crate::result::{DataSource, FetchError, QueryResult};
use crate::transport::OperationRequest;

#[derive(Debug, Clone)]
pub struct MutationStore {
    client: Client,
    artifact: DocumentArtifact,
}

impl MutationStore {
    pub(crate) fn new(client: Client, artifact: DocumentArtifact) -> Self {
        Self { client, artifact }
    }

    pub fn artifact(&self) -> &DocumentArtifact {
        &self.artifact
    }

    /// Send the mutation and write its response.
    pub async fn mutate(
        &self,
        variables: Option<Variables>,
        context: Option<ExecutionContext>,
    ) -> QuarryResult<QueryResult> {
        let name = self.artifact.name.as_str();
        self.client.context_kind(context.as_ref(), name)?;
        let (transport, session) = self.client.resolve_transport(context.as_ref(), name)?;
        let variables = self.artifact.resolve_variables(variables.as_ref());

        let request = OperationRequest::new(&self.artifact, variables.clone(), None);
        tracing::debug!(document = %name, request_id = %request.id, "Sending mutation");

        let mut result = QueryResult {
            variables: variables.clone(),
            ..QueryResult::default()
        };
        match transport.execute(request, session.as_ref()).await {
            Ok(response) => {
                result
                    .errors
                    .extend(response.errors.into_iter().map(FetchError::Operation));
                if let Some(data) = response.data.filter(|d| !d.is_null()) {
                    match self
                        .client
                        .cache()
                        .write_query(&self.artifact.selection, &data, &variables)
                    {
                        Ok(_) => result.source = Some(DataSource::Network),
                        Err(QuarryError::Store(e)) => {
                            tracing::warn!(document = %name, error = %e, "Mutation response did not fit selection");
                            result.errors.push(FetchError::Store(e));
                        }
                        Err(e) => return Err(e),
                    }
                    result.data = data;
                }
            }
            Err(e) => {
                tracing::debug!(document = %name, error = %e, "Mutation transport failed");
                result.errors.push(FetchError::Transport(e));
                result.data = Value::Null;
            }
        }
        Ok(result)
    }
}
