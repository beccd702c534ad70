use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
#[error("unable to connect to endpoint {url}: {status_code} status code")]
pub struct ServerError {
    pub status_code: u16,
    pub url: String,
}

pub fn check_status(res: &reqwest::Response) -> Result<(), ServerError> {
    let status = res.status();
    if !status.is_success() {
        return Err(ServerError {
            status_code: status.as_u16(),
            url: res.url().to_string(),
        });
    }
    Ok(())
}

/// Error payload the ArcGIS REST API embeds in a response body, possibly
/// alongside a 200 status.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceFault {
    pub code: u16,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Vec<String>,
}

impl ServiceFault {
    /// The first detail line is usually the most specific description.
    pub fn into_message(self) -> String {
        self.details
            .into_iter()
            .next()
            .or(self.message)
            .unwrap_or_else(|| "Error".to_owned())
    }
}
