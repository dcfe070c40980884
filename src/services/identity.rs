use std::time::Duration;

use tokio::sync::OnceCell;
use uuid::Uuid;

/// Well-known EC2 instance-metadata address.
const METADATA_URL: &str = "http://169.254.169.254/latest/meta-data/instance-id";

/// Short connect timeout so environments without a metadata service fail fast.
const METADATA_CONNECT_TIMEOUT: Duration = Duration::from_millis(300);
const METADATA_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

static IDENTIFIER: OnceCell<String> = OnceCell::const_new();

/// Source of the identifier used as an object-key prefix.
#[async_trait::async_trait]
pub trait IdentifierProvider: Send + Sync {
    async fn identifier(&self) -> String;
}

/// Resolves a stable identifier for this process: the EC2 instance id, the
/// local network address, or a random UUID, whichever comes first. The result
/// is shared by every upload in the process.
pub struct InstanceIdentifier;

#[async_trait::async_trait]
impl IdentifierProvider for InstanceIdentifier {
    async fn identifier(&self) -> String {
        IDENTIFIER
            .get_or_init(|| async {
                let id = resolve().await;
                tracing::info!("🆔 Using identifier prefix \"{}\"", id);
                id
            })
            .await
            .clone()
    }
}

/// Fixed identifier for tests and for hosts that already know their name.
pub struct FixedIdentifier(pub String);

#[async_trait::async_trait]
impl IdentifierProvider for FixedIdentifier {
    async fn identifier(&self) -> String {
        self.0.clone()
    }
}

async fn resolve() -> String {
    if let Some(id) = fetch_metadata_identifier(METADATA_URL).await {
        return id;
    }
    if let Some(addr) = local_address_identifier().await {
        return addr;
    }
    Uuid::new_v4().to_string()
}

/// Asks the instance-metadata endpoint for the instance id. Any failure or an
/// empty body means "no result"; nothing here is surfaced to the caller.
async fn fetch_metadata_identifier(url: &str) -> Option<String> {
    let client = reqwest::Client::builder()
        .connect_timeout(METADATA_CONNECT_TIMEOUT)
        .timeout(METADATA_REQUEST_TIMEOUT)
        .build()
        .ok()?;

    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!("Instance metadata not reachable: {}", e);
            return None;
        }
    };

    if !response.status().is_success() {
        tracing::debug!("Instance metadata returned {}", response.status());
        return None;
    }

    let body = response.text().await.ok()?;
    let id = body.trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

async fn local_address_identifier() -> Option<String> {
    let hostname = gethostname::gethostname().into_string().ok()?;

    let mut addrs = match tokio::net::lookup_host((hostname.as_str(), 0)).await {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::debug!("Local address lookup failed: {}", e);
            return None;
        }
    };

    let addr = addrs.next()?;
    let stripped = strip_address(&addr.ip().to_string());
    if stripped.is_empty() {
        None
    } else {
        Some(stripped)
    }
}

/// Keeps only the characters that are safe inside an object-key segment.
fn strip_address(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.')
        .collect()
}
