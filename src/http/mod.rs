use reqwest::{Client, Method, RequestBuilder, Response};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// No timeout unless one is given: a hung request stays pending.
    pub fn new(timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder =
            Client::builder().user_agent(concat!("showtrack/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Sends a prepared request. Only the path is logged, query strings may carry keys.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, reqwest::Error> {
        let request = request.build()?;
        let method = request.method().clone();
        let path = request.url().path().to_string();

        debug!(%method, %path, "Making request");
        let response = self.client.execute(request).await?;

        if !response.status().is_success() {
            warn!(%method, %path, "Request failed with status: {}", response.status());
        }

        Ok(response)
    }
}

/// Reads an error body without failing; an unreadable body becomes empty.
pub async fn error_body(response: Response) -> String {
    response.text().await.unwrap_or_default()
}
