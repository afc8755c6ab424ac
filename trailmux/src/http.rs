use async_trait::async_trait;
use reqwest::{Client, Proxy, StatusCode, Url};
use std::{path::Path, time::Duration};
use thiserror::Error;
use tokio::{fs::File, io::AsyncWriteExt};

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
#[error("{url} ({reason})")]
pub struct TransportError {
    pub url: String,
    pub reason: String,
    /// Worth retrying: connection resets, timeouts, throttling and gateway errors.
    pub transient: bool,
}

impl TransportError {
    pub fn transient(url: impl ToString, reason: impl ToString) -> Self {
        Self {
            url: url.to_string(),
            reason: reason.to_string(),
            transient: true,
        }
    }

    pub fn fatal(url: impl ToString, reason: impl ToString) -> Self {
        Self {
            url: url.to_string(),
            reason: reason.to_string(),
            transient: false,
        }
    }
}

/// HTTP access used for catalogs, segments and tool bundles.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url) -> Result<Vec<u8>, TransportError>;

    /// Streams the body of `url` into `path`, returning the number of bytes written.
    async fn download(&self, url: &Url, path: &Path) -> Result<u64, TransportError> {
        let data = self.get(url).await?;
        write_file(url, path, &data).await?;
        Ok(data.len() as u64)
    }
}

pub struct ReqwestTransport {
    client: Client,
    bundle_timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(
        proxy: Option<Proxy>,
        user_agent: &str,
        request_timeout: Duration,
        bundle_timeout: Duration,
    ) -> reqwest::Result<Self> {
        let mut client_builder = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(30))
            .timeout(request_timeout);

        if let Some(proxy) = proxy {
            client_builder = client_builder.proxy(proxy);
        }

        Ok(Self {
            client: client_builder.build()?,
            bundle_timeout,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &Url) -> Result<Vec<u8>, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| check_reqwest_error(url, &e))?;
        check_status(url, response.status())?;

        let data = response
            .bytes()
            .await
            .map_err(|e| check_reqwest_error(url, &e))?;
        Ok(data.to_vec())
    }

    async fn download(&self, url: &Url, path: &Path) -> Result<u64, TransportError> {
        let mut response = self
            .client
            .get(url.clone())
            .timeout(self.bundle_timeout)
            .send()
            .await
            .map_err(|e| check_reqwest_error(url, &e))?;
        check_status(url, response.status())?;

        let mut file = File::create(path).await.map_err(|e| {
            TransportError::fatal(url, format!("cannot create {}: {e}", path.display()))
        })?;
        let mut written = 0;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| check_reqwest_error(url, &e))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| TransportError::fatal(url, format!("disk write failed: {e}")))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| TransportError::fatal(url, format!("disk write failed: {e}")))?;
        Ok(written)
    }
}

pub(crate) async fn write_file(url: &Url, path: &Path, data: &[u8]) -> Result<(), TransportError> {
    let mut file = File::create(path)
        .await
        .map_err(|e| TransportError::fatal(url, format!("cannot create {}: {e}", path.display())))?;
    file.write_all(data)
        .await
        .map_err(|e| TransportError::fatal(url, format!("disk write failed: {e}")))?;
    file.flush()
        .await
        .map_err(|e| TransportError::fatal(url, format!("disk write failed: {e}")))
}

fn check_status(url: &Url, status: StatusCode) -> Result<(), TransportError> {
    if status.is_success() {
        return Ok(());
    }

    let reason = format!("HTTP {status}");

    if is_transient_status(status) {
        Err(TransportError::transient(url, reason))
    } else {
        Err(TransportError::fatal(url, reason))
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn check_reqwest_error(url: &Url, error: &reqwest::Error) -> TransportError {
    if error.is_connect() {
        return TransportError::transient(url, "connection error");
    } else if error.is_timeout() {
        return TransportError::transient(url, "timeout");
    }

    if let Some(status) = error.status() {
        if is_transient_status(status) {
            TransportError::transient(url, format!("HTTP {status}"))
        } else {
            TransportError::fatal(url, format!("HTTP {status}"))
        }
    } else if error.is_body() || error.is_request() {
        TransportError::transient(url, error)
    } else {
        TransportError::fatal(url, error)
    }
}
