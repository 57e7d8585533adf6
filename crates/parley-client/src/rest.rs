//! REST history loader.

use std::future::Future;

use parley_proto::{ChatMessage, HistoryPage};

use crate::history::{HistoryError, HistoryLoader, HistoryQuery};

/// Loads history from `GET {api}/rooms/{roomId}/messages?page&size`.
#[derive(Debug, Clone)]
pub struct RestHistoryLoader {
    client: reqwest::Client,
    api_url: String,
}

impl RestHistoryLoader {
    /// Loader for the API rooted at `api_url` (e.g. `http://host/api`).
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Loader sharing an existing HTTP client.
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    fn messages_url(&self, query: &HistoryQuery) -> String {
        format!("{}/rooms/{}/messages", self.api_url, query.room_id)
    }
}

impl HistoryLoader for RestHistoryLoader {
    fn load(
        &self,
        query: HistoryQuery,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, HistoryError>> + Send {
        let client = self.client.clone();
        let url = self.messages_url(&query);
        async move {
            let response = client
                .get(&url)
                .query(&[("page", query.page), ("size", query.size)])
                .bearer_auth(query.credential.token())
                .send()
                .await
                .map_err(|e| HistoryError::Request(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(HistoryError::Status { status: status.as_u16() });
            }

            let page: HistoryPage =
                response.json().await.map_err(|e| HistoryError::Decode(e.to_string()))?;
            Ok(page.into_messages())
        }
    }
}

#[cfg(test)]
mod tests {
    use parley_core::Credential;

    use super::*;

    #[test]
    fn messages_url_ignores_trailing_slash() {
        let loader = RestHistoryLoader::new("http://localhost:8080/api/");
        let query =
            HistoryQuery { room_id: 42, page: 0, size: 50, credential: Credential::new("t") };
        assert_eq!(loader.messages_url(&query), "http://localhost:8080/api/rooms/42/messages");
    }
}
