use cchub_auth::{HttpClient, ProviderConfig, TokenProvider};
use tracing_subscriber::EnvFilter;
use url::Url;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // CCHUB_BASE_URL (or CCHUB_TOKEN_ENDPOINT), CCHUB_CLIENT_ID, CCHUB_CLIENT_SECRET
    let config = ProviderConfig::from_env()?;
    let api_url: Url = std::env::var("CCHUB_API_URL")?.parse()?;
    let storefront_id = std::env::var("CCHUB_STOREFRONT_ID")?;
    let user_id = std::env::args().nth(1).unwrap_or_else(|| "demo-user".to_string());

    let provider = TokenProvider::new(&config)?;

    // Obtain a token with the default scope before serving anything.
    provider.prefetch().await?;
    tracing::info!("Token provider ready");

    // Later calls reuse the cached token until it is about to expire.
    let client = HttpClient::new(provider.clone());
    let response = client
        .get(api_url.join(&format!(
            "api/storefront/v1/storefront-users/{user_id}?storefrontId={storefront_id}"
        ))?)
        .await?
        .send()
        .await?;
    tracing::info!(status = %response.status(), "Fetched storefront user");

    // The scope is only sent when the cached token has to be refreshed.
    let projects = HttpClient::new(provider.scoped("Projects_full Private_assets_full"));
    let response = projects
        .get(api_url.join(&format!(
            "api/storefront/v1/projects?storefrontId={storefront_id}"
        ))?)
        .await?
        .send()
        .await?;
    tracing::info!(status = %response.status(), "Listed projects");

    Ok(())
}
