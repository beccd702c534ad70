//! Client for the ArcGIS World Geocoding Service REST API.

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::auth::{
    client_credentials::ClientCredentials, ConfigError, Token as _, TokenManager, TokenProvider,
};
use crate::utils::{check_status, ServerError, ServiceFault};

pub const DEFAULT_ENDPOINT: &str =
    "https://geocode.arcgis.com/arcgis/rest/services/World/GeocodeServer/";

/// The token provider wired up by the plain constructors.
pub type DefaultAuth = TokenManager<ClientCredentials>;

pub struct Geocoder<Auth> {
    pub client: reqwest::Client,
    pub endpoint: String,
    pub auth: Option<Auth>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error<AuthError> {
    #[error("auth: {0}")]
    Auth(#[source] AuthError),
    #[error("please specify client_id and client_secret")]
    CredentialsRequired,
    #[error("not a valid lng,lat pair: {0}")]
    InvalidLngLat(String),
    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("server: {0}")]
    Server(#[from] ServerError),
    #[error("service error {code}: {message}")]
    Service { code: u16, message: String },
}

/// Input for forward geocoding.
pub enum AddressInput {
    /// Free-form single line address.
    SingleLine(String),
    /// Pre-split address fields, passed through as query parameters.
    Fields(Vec<(String, String)>),
}

impl From<&str> for AddressInput {
    fn from(line: &str) -> Self {
        Self::SingleLine(line.to_owned())
    }
}

impl From<String> for AddressInput {
    fn from(line: String) -> Self {
        Self::SingleLine(line)
    }
}

/// One entry of a batch geocoding request.
pub enum BatchAddress {
    SingleLine(String),
    /// Raw record attributes, e.g. `Address`, `City`, `Region`.
    Attributes(serde_json::Map<String, serde_json::Value>),
}

impl From<&str> for BatchAddress {
    fn from(line: &str) -> Self {
        Self::SingleLine(line.to_owned())
    }
}

/// Optional request parameters. `extras` is merged into the query verbatim
/// for anything this struct does not model.
#[derive(Debug, Default, Clone)]
pub struct Params {
    pub out_fields: Option<String>,
    pub max_locations: Option<u32>,
    pub max_suggestions: Option<u32>,
    /// Route through the authenticated path and ask the service to allow
    /// storing the results.
    pub for_storage: bool,
    pub extras: Vec<(String, String)>,
}

impl Geocoder<DefaultAuth> {
    /// Unauthenticated client against the public World geocoding endpoint.
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            auth: None,
        }
    }

    /// Client that can also serve authenticated operations.
    pub fn with_credentials(
        client: reqwest::Client,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let credentials = ClientCredentials::new(client.clone(), client_id, client_secret)?;
        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            auth: Some(TokenManager::new(credentials)),
        })
    }
}

impl<Auth> Geocoder<Auth>
where
    Auth: TokenProvider,
{
    /// Forward geocode an address. With `for_storage` set the request is
    /// authenticated and results may be persisted by the caller.
    pub async fn find_address_candidates(
        &self,
        input: AddressInput,
        params: Params,
    ) -> Result<model::GeocodeResponse, Error<Auth::Error>> {
        let query = Self::query_find_address_candidates(&input, &params);
        if params.for_storage {
            self.run_auth("findAddressCandidates", query).await
        } else {
            self.run("findAddressCandidates", query).await
        }
    }

    /// Alias for [`Self::find_address_candidates`], kept for parity with
    /// older releases of this client.
    pub async fn geocode(
        &self,
        input: AddressInput,
        params: Params,
    ) -> Result<model::GeocodeResponse, Error<Auth::Error>> {
        self.find_address_candidates(input, params).await
    }

    /// Reverse geocode a `"lng,lat"` pair. Invalid input fails before any
    /// network call.
    pub async fn reverse(
        &self,
        lnglat: &str,
        params: Params,
    ) -> Result<model::ReverseResponse, Error<Auth::Error>> {
        if validate_lnglat(lnglat).is_none() {
            return Err(Error::InvalidLngLat(lnglat.to_owned()));
        }
        let query = Self::query_reverse(lnglat, &params);
        if params.for_storage {
            self.run_auth("reverseGeocode", query).await
        } else {
            self.run("reverseGeocode", query).await
        }
    }

    /// Suggest completions for a partial address. Never authenticated.
    pub async fn suggest(
        &self,
        text: &str,
        params: Params,
    ) -> Result<model::SuggestResponse, Error<Auth::Error>> {
        let query = Self::query_suggest(text, &params);
        self.run("suggest", query).await
    }

    /// Batch geocode a list of addresses. Always authenticated.
    pub async fn geocode_addresses(
        &self,
        addresses: &[BatchAddress],
        params: Params,
    ) -> Result<model::BatchResponse, Error<Auth::Error>> {
        let query = Self::query_geocode_addresses(addresses, &params);
        self.run_auth("geocodeAddresses", query).await
    }

    fn query_find_address_candidates(
        input: &AddressInput,
        params: &Params,
    ) -> Vec<(String, String)> {
        let mut query = match input {
            AddressInput::SingleLine(line) => vec![("SingleLine".to_owned(), line.clone())],
            AddressInput::Fields(fields) => fields.clone(),
        };
        if let Some(out_fields) = &params.out_fields {
            query.push(("outFields".to_owned(), out_fields.clone()));
        }
        if let Some(max_locations) = params.max_locations {
            query.push(("maxLocations".to_owned(), max_locations.to_string()));
        }
        Self::finish_query(query, params)
    }

    fn query_reverse(location: &str, params: &Params) -> Vec<(String, String)> {
        let query = vec![
            ("location".to_owned(), location.to_owned()),
            (
                "maxLocations".to_owned(),
                params.max_locations.unwrap_or(10).to_string(),
            ),
        ];
        Self::finish_query(query, params)
    }

    fn query_suggest(text: &str, params: &Params) -> Vec<(String, String)> {
        let query = vec![
            ("text".to_owned(), text.to_owned()),
            (
                "outFields".to_owned(),
                params.out_fields.clone().unwrap_or_else(|| "*".to_owned()),
            ),
            (
                "maxSuggestions".to_owned(),
                params.max_suggestions.unwrap_or(10).to_string(),
            ),
        ];
        Self::finish_query(query, params)
    }

    fn query_geocode_addresses(
        addresses: &[BatchAddress],
        params: &Params,
    ) -> Vec<(String, String)> {
        let records: Vec<serde_json::Value> = addresses
            .iter()
            .enumerate()
            .map(|(index, address)| {
                let mut attributes = match address {
                    BatchAddress::SingleLine(line) => {
                        let mut map = serde_json::Map::new();
                        map.insert("SingleLine".to_owned(), line.clone().into());
                        map
                    }
                    BatchAddress::Attributes(map) => map.clone(),
                };
                attributes.insert("OBJECTID".to_owned(), index.into());
                serde_json::json!({ "attributes": attributes })
            })
            .collect();
        let payload = serde_json::json!({ "records": records });

        let query = vec![("addresses".to_owned(), payload.to_string())];
        Self::finish_query(query, params)
    }

    fn finish_query(mut query: Vec<(String, String)>, params: &Params) -> Vec<(String, String)> {
        query.extend(params.extras.iter().cloned());
        if params.for_storage {
            query.push(("forStorage".to_owned(), "true".to_owned()));
        }
        query
    }

    async fn run<T>(
        &self,
        method: &str,
        mut query: Vec<(String, String)>,
    ) -> Result<T, Error<Auth::Error>>
    where
        T: DeserializeOwned,
    {
        query.push(("f".to_owned(), "json".to_owned()));
        let qs = serde_urlencoded::to_string(&query).expect("string pairs always urlencode");
        let url = format!("{}{}?{}", self.endpoint, method, qs);

        // The url may carry a token, log only the method.
        debug!(message = "Dispatching geocoding request", %method);

        let req = self.client.get(&url).build()?;
        let res = self.client.execute(req).await?;
        check_status(&res)?;

        // Service-level failures come back inside a 200 body.
        match res.json().await? {
            ApiResult::Failure { error } => Err(Error::Service {
                code: error.code,
                message: error.into_message(),
            }),
            ApiResult::Success(value) => Ok(value),
        }
    }

    async fn run_auth<T>(
        &self,
        method: &str,
        mut query: Vec<(String, String)>,
    ) -> Result<T, Error<Auth::Error>>
    where
        T: DeserializeOwned,
    {
        let provider = self.auth.as_ref().ok_or(Error::CredentialsRequired)?;
        let token = provider.get_auth_token().await.map_err(Error::Auth)?;
        query.push(("token".to_owned(), token.access_token().to_owned()));
        self.run(method, query).await
    }
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum ApiResult<T> {
    Failure { error: ServiceFault },
    Success(T),
}

/// Checks a `"lng,lat"` string and returns the parsed pair if both halves
/// are numbers in range.
pub fn validate_lnglat(lnglat: &str) -> Option<(f64, f64)> {
    let mut parts = lnglat.split(',');
    let (lng, lat) = match (parts.next(), parts.next(), parts.next()) {
        (Some(lng), Some(lat), None) => (lng, lat),
        _ => return None,
    };
    let lng: f64 = lng.trim().parse().ok()?;
    let lat: f64 = lat.trim().parse().ok()?;
    if lng > -180.0 && lng < 180.0 && lat > -90.0 && lat < 90.0 {
        return Some((lng, lat));
    }
    None
}

pub mod model {
    use serde::{Deserialize, Serialize};

    #[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GeocodeResponse {
        #[serde(default)]
        pub spatial_reference: Option<SpatialReference>,
        #[serde(default)]
        pub candidates: Vec<Candidate>,
    }

    #[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Candidate {
        /// The matched address text.
        pub address: String,
        pub location: Point,
        #[serde(default)]
        pub score: f64,
        #[serde(default)]
        pub attributes: serde_json::Map<String, serde_json::Value>,
        #[serde(default)]
        pub extent: Option<Extent>,
    }

    #[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Point {
        pub x: f64,
        pub y: f64,
    }

    #[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Extent {
        pub xmin: f64,
        pub ymin: f64,
        pub xmax: f64,
        pub ymax: f64,
    }

    #[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SpatialReference {
        #[serde(default)]
        pub wkid: Option<u32>,
        #[serde(default)]
        pub latest_wkid: Option<u32>,
    }

    #[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SuggestResponse {
        #[serde(default)]
        pub suggestions: Vec<Suggestion>,
    }

    #[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Suggestion {
        pub text: String,
        pub magic_key: String,
        #[serde(default)]
        pub is_collection: bool,
    }

    /// Reverse geocoding result. The address fields use irregular casing
    /// (`Match_addr`, `City`, ...), so they stay a raw map.
    #[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ReverseResponse {
        #[serde(default)]
        pub address: serde_json::Map<String, serde_json::Value>,
        #[serde(default)]
        pub location: Option<Point>,
    }

    #[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct BatchResponse {
        #[serde(default)]
        pub spatial_reference: Option<SpatialReference>,
        #[serde(default)]
        pub locations: Vec<Candidate>,
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;

    use super::*;

    type TestGeocoder = Geocoder<DefaultAuth>;

    #[test]
    fn lnglat_validation() {
        assert_eq!(validate_lnglat("-0.195405,51.484463"), Some((-0.195405, 51.484463)));
        assert!(validate_lnglat("13.4, 52.5").is_some());
        assert!(validate_lnglat("181,0").is_none());
        assert!(validate_lnglat("0,91").is_none());
        assert!(validate_lnglat("not-a-pair").is_none());
        assert!(validate_lnglat("1,2,3").is_none());
    }

    #[test]
    fn single_line_query_shape() {
        let query = TestGeocoder::query_find_address_candidates(
            &"380 New York Street, Redlands".into(),
            &Params::default(),
        );
        assert_eq!(
            query,
            vec![(
                "SingleLine".to_owned(),
                "380 New York Street, Redlands".to_owned()
            )]
        );
    }

    #[test]
    fn suggest_query_applies_defaults() {
        let query = TestGeocoder::query_suggest("Gauer Straße, Berlin", &Params::default());
        assert_eq!(
            query,
            vec![
                ("text".to_owned(), "Gauer Straße, Berlin".to_owned()),
                ("outFields".to_owned(), "*".to_owned()),
                ("maxSuggestions".to_owned(), "10".to_owned()),
            ]
        );
    }

    #[test]
    fn batch_query_numbers_records_and_expands_single_lines() {
        let mut attributes = serde_json::Map::new();
        attributes.insert("Address".to_owned(), "1 World Way".into());
        attributes.insert("City".to_owned(), "Los Angeles".into());

        let addresses = [
            BatchAddress::from("381 New York St., Redlands, CA, 92373"),
            BatchAddress::Attributes(attributes),
        ];
        let query = TestGeocoder::query_geocode_addresses(&addresses, &Params::default());

        assert_eq!(query.len(), 1);
        assert_eq!(query[0].0, "addresses");
        let payload: serde_json::Value = serde_json::from_str(&query[0].1).unwrap();
        assert_eq!(
            payload,
            serde_json::json!({
                "records": [
                    {
                        "attributes": {
                            "OBJECTID": 0,
                            "SingleLine": "381 New York St., Redlands, CA, 92373"
                        }
                    },
                    {
                        "attributes": {
                            "OBJECTID": 1,
                            "Address": "1 World Way",
                            "City": "Los Angeles"
                        }
                    }
                ]
            })
        );
    }

    #[tokio::test]
    async fn authenticated_operation_without_credentials_fails_up_front() {
        let geocoder = Geocoder::new(reqwest::Client::new());
        let err = geocoder
            .geocode_addresses(&["Berlin".into()], Params::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CredentialsRequired));
    }

    #[tokio::test]
    async fn reverse_rejects_invalid_input_before_any_request() {
        let geocoder = Geocoder::new(reqwest::Client::new());
        let err = geocoder
            .reverse("999,999", Params::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidLngLat(_)));
    }

    #[tokio::test]
    async fn suggest_parses_the_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/suggest")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("text".into(), "Berlin".into()),
                Matcher::UrlEncoded("maxSuggestions".into(), "10".into()),
                Matcher::UrlEncoded("f".into(), "json".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"suggestions":[{"text":"Berlin, DEU","magicKey":"dHA9MA","isCollection":false}]}"#,
            )
            .create_async()
            .await;

        let mut geocoder = Geocoder::new(reqwest::Client::new());
        geocoder.endpoint = format!("{}/", server.url());

        let res = geocoder.suggest("Berlin", Params::default()).await.unwrap();
        assert_eq!(res.suggestions.len(), 1);
        assert_eq!(res.suggestions[0].text, "Berlin, DEU");
        assert_eq!(res.suggestions[0].magic_key, "dHA9MA");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn for_storage_runs_the_exchange_and_attaches_the_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"abc123","expires_in":1440}"#)
            .create_async()
            .await;
        let mock = server
            .mock("GET", "/findAddressCandidates")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("SingleLine".into(), "Berlin".into()),
                Matcher::UrlEncoded("forStorage".into(), "true".into()),
                Matcher::UrlEncoded("token".into(), "abc123".into()),
                Matcher::UrlEncoded("f".into(), "json".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"spatialReference":{"wkid":4326},"candidates":[{"address":"Berlin","location":{"x":13.4,"y":52.5},"score":100}]}"#,
            )
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let credentials = ClientCredentials::new(client.clone(), "id", "secret")
            .unwrap()
            .with_authendpoint(format!("{}/token", server.url()));
        let geocoder = Geocoder {
            client,
            endpoint: format!("{}/", server.url()),
            auth: Some(TokenManager::new(credentials)),
        };

        let params = Params {
            for_storage: true,
            ..Params::default()
        };
        let res = geocoder
            .find_address_candidates("Berlin".into(), params)
            .await
            .unwrap();

        assert_eq!(res.candidates.len(), 1);
        assert_eq!(res.candidates[0].location, model::Point { x: 13.4, y: 52.5 });
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn service_error_in_a_200_body_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/findAddressCandidates")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":{"code":400,"details":["invalid client"]}}"#)
            .create_async()
            .await;

        let mut geocoder = Geocoder::new(reqwest::Client::new());
        geocoder.endpoint = format!("{}/", server.url());

        match geocoder
            .find_address_candidates("Berlin".into(), Params::default())
            .await
        {
            Err(Error::Service { code, message }) => {
                assert_eq!(code, 400);
                assert_eq!(message, "invalid client");
            }
            other => panic!("expected a service error, got {other:?}"),
        }
    }
}
