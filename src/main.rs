use anyhow::Context;
use geocoder_arcgis::geocoder::{Geocoder, Params};
use tracing::info;

/// Geocode a single address given on the command line and print the raw
/// candidate list. Credentials are optional; set ARCGIS_CLIENT_ID and
/// ARCGIS_CLIENT_SECRET to enable authenticated requests.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let address = std::env::args()
        .nth(1)
        .context("usage: geocoder-arcgis <address>")?;

    let reqwest_client = reqwest::Client::builder()
        .connection_verbose(true)
        .build()?;

    let client_id = std::env::var("ARCGIS_CLIENT_ID").ok();
    let client_secret = std::env::var("ARCGIS_CLIENT_SECRET").ok();

    let geocoder = match (client_id, client_secret) {
        (Some(client_id), Some(client_secret)) => {
            info!("Using authenticated client");
            Geocoder::with_credentials(reqwest_client, client_id, client_secret)?
        }
        _ => Geocoder::new(reqwest_client),
    };

    let res = geocoder
        .find_address_candidates(address.into(), Params::default())
        .await?;

    println!("{}", serde_json::to_string_pretty(&res)?);
    Ok(())
}
