// Flickr photo-hosting adapter
//
// Positions are pushed to the Flickr geo API instead of into local files.
// Flickr's REST endpoints use OAuth 1.0a with HMAC-SHA1 request signing; the
// access token is obtained once through the out-of-band verifier flow and
// cached on disk for subsequent runs.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::NaiveDateTime;
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::Sha1;
use tracing::{debug, info};

use crate::errors::{Error, Result};
use crate::kml::Placemark;
use crate::locate::Position;
use crate::sync::SyncAdapter;
use crate::timeshift::CaptureTime;

const REST_URL: &str = "https://www.flickr.com/services/rest/";
const REQUEST_TOKEN_URL: &str = "https://www.flickr.com/services/oauth/request_token";
const AUTHORIZE_URL: &str = "https://www.flickr.com/services/oauth/authorize";
const ACCESS_TOKEN_URL: &str = "https://www.flickr.com/services/oauth/access_token";

/// Photo metadata requested alongside each album page.
const PHOTO_EXTRAS: &str = "url_m,date_taken,geo";

/// Flickr reports capture times in this layout, without a zone.
const DATE_TAKEN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static ALBUM_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"flickr\.com/photos/[^/]+/(?:albums|sets)/(\d+)").unwrap());

/// OAuth percent-encoding: everything except unreserved characters.
const OAUTH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// An album identified from its public URL.
#[derive(Debug, Clone)]
pub struct FlickrAlbum {
    pub album_id: String,
    pub url: String,
}

/// Extract the album id from a `flickr.com/photos/<user>/albums/<id>` URL.
pub fn parse_album_url(url: &str) -> Result<FlickrAlbum> {
    let captures = ALBUM_URL_RE
        .captures(url)
        .ok_or_else(|| Error::Api(format!("not a Flickr album URL: {}", url)))?;
    Ok(FlickrAlbum {
        album_id: captures[1].to_string(),
        url: url.to_string(),
    })
}

/// One photo from an album listing.
#[derive(Debug, Clone)]
pub struct FlickrPhoto {
    pub id: String,
    pub title: String,
    pub date_taken: String,
    /// 0 when the photo is not georeferenced (Flickr's convention)
    pub latitude: f64,
    pub thumbnail_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessToken {
    oauth_token: String,
    oauth_token_secret: String,
}

/// Minimal OAuth 1.0a client for the Flickr REST API.
pub struct FlickrClient {
    http: Client,
    api_key: String,
    api_secret: String,
    token: AccessToken,
}

impl FlickrClient {
    /// Authenticate against Flickr, reusing a cached access token when one
    /// exists at `token_cache`. First-time authorization walks the
    /// out-of-band flow: the user opens the printed URL and types the
    /// verifier code back in.
    pub fn connect(api_key: &str, api_secret: &str, token_cache: &Path) -> Result<FlickrClient> {
        let http = Client::new();

        if let Ok(contents) = fs::read_to_string(token_cache) {
            if let Ok(token) = serde_json::from_str::<AccessToken>(&contents) {
                debug!("Using cached Flickr access token");
                return Ok(FlickrClient {
                    http,
                    api_key: api_key.to_string(),
                    api_secret: api_secret.to_string(),
                    token,
                });
            }
        }

        let token = authorize(&http, api_key, api_secret)?;
        if let Some(parent) = token_cache.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(token_cache, serde_json::to_string_pretty(&token)?)?;
        info!("Flickr access token cached in {}", token_cache.display());

        Ok(FlickrClient {
            http,
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            token,
        })
    }

    /// Call a REST API method and return the parsed JSON payload.
    fn call(&self, method: &str, extra: &[(&str, String)]) -> Result<Value> {
        let mut params: Vec<(String, String)> = vec![
            ("method".to_string(), method.to_string()),
            ("format".to_string(), "json".to_string()),
            ("nojsoncallback".to_string(), "1".to_string()),
        ];
        for (name, value) in extra {
            params.push((name.to_string(), value.clone()));
        }
        params.extend(oauth_base_params(&self.api_key));
        params.push(("oauth_token".to_string(), self.token.oauth_token.clone()));
        append_signature(
            "GET",
            REST_URL,
            &mut params,
            &self.api_secret,
            &self.token.oauth_token_secret,
        );

        let response = self
            .http
            .get(REST_URL)
            .query(&params)
            .send()?
            .error_for_status()?;
        let payload: Value = response.json()?;

        if payload["stat"].as_str() != Some("ok") {
            let message = payload["message"].as_str().unwrap_or("unknown failure");
            return Err(Error::Api(format!("{}: {}", method, message)));
        }
        Ok(payload)
    }

    /// Resolve the numeric user id behind an album URL.
    pub fn lookup_user(&self, url: &str) -> Result<String> {
        let payload = self.call("flickr.urls.lookupUser", &[("url", url.to_string())])?;
        payload["user"]["id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Api("lookupUser returned no user id".to_string()))
    }

    /// Fetch every photo of an album, following pagination.
    pub fn album_photos(&self, album: &FlickrAlbum) -> Result<Vec<FlickrPhoto>> {
        let mut photos = Vec::new();
        let mut page = 1u64;
        loop {
            let payload = self.call(
                "flickr.photosets.getPhotos",
                &[
                    ("photoset_id", album.album_id.clone()),
                    ("extras", PHOTO_EXTRAS.to_string()),
                    ("page", page.to_string()),
                ],
            )?;
            let photoset = &payload["photoset"];

            if page == 1 {
                info!(
                    "Processing album '{}' with {} photos...",
                    photoset["title"].as_str().unwrap_or("?"),
                    text_or_number(&photoset["total"]),
                );
            }

            if let Some(entries) = photoset["photo"].as_array() {
                for entry in entries {
                    photos.push(parse_photo(entry));
                }
            }

            let pages = photoset["pages"].as_u64().unwrap_or(1);
            if page >= pages {
                break;
            }
            page += 1;
        }
        Ok(photos)
    }

    pub fn set_location(&self, photo_id: &str, position: Position) -> Result<()> {
        self.call(
            "flickr.photos.geo.setLocation",
            &[
                ("photo_id", photo_id.to_string()),
                ("lat", position.lat.to_string()),
                ("lon", position.lon.to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn remove_location(&self, photo_id: &str) -> Result<()> {
        self.call(
            "flickr.photos.geo.removeLocation",
            &[("photo_id", photo_id.to_string())],
        )?;
        Ok(())
    }
}

/// Run the out-of-band authorization flow and return the access token.
fn authorize(http: &Client, api_key: &str, api_secret: &str) -> Result<AccessToken> {
    info!("Logging in to Flickr...");

    // Step 1: request token, signed with an empty token secret.
    let mut params = oauth_base_params(api_key);
    params.push(("oauth_callback".to_string(), "oob".to_string()));
    append_signature("GET", REQUEST_TOKEN_URL, &mut params, api_secret, "");
    let body = http
        .get(REQUEST_TOKEN_URL)
        .query(&params)
        .send()?
        .error_for_status()?
        .text()?;
    let request_token = parse_form_response(&body)?;

    // Step 2: the user authorizes in a browser and reports the verifier.
    println!(
        "Open this URL to authorize the application:\n{}?oauth_token={}&perms=write",
        AUTHORIZE_URL, request_token.oauth_token
    );
    print!("Verifier code: ");
    io::stdout().flush()?;
    let mut verifier = String::new();
    io::stdin().lock().read_line(&mut verifier)?;
    let verifier = verifier.trim().to_string();

    // Step 3: exchange for the access token.
    let mut params = oauth_base_params(api_key);
    params.push(("oauth_token".to_string(), request_token.oauth_token.clone()));
    params.push(("oauth_verifier".to_string(), verifier));
    append_signature(
        "GET",
        ACCESS_TOKEN_URL,
        &mut params,
        api_secret,
        &request_token.oauth_token_secret,
    );
    let body = http
        .get(ACCESS_TOKEN_URL)
        .query(&params)
        .send()?
        .error_for_status()?
        .text()?;
    parse_form_response(&body)
}

/// The OAuth parameters common to every signed request.
fn oauth_base_params(api_key: &str) -> Vec<(String, String)> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    vec![
        ("oauth_consumer_key".to_string(), api_key.to_string()),
        ("oauth_nonce".to_string(), format!("{:016x}", rand::random::<u64>())),
        ("oauth_signature_method".to_string(), "HMAC-SHA1".to_string()),
        ("oauth_timestamp".to_string(), timestamp.to_string()),
        ("oauth_version".to_string(), "1.0".to_string()),
    ]
}

/// Compute the OAuth 1.0a signature over the request and append it.
fn append_signature(
    http_method: &str,
    url: &str,
    params: &mut Vec<(String, String)>,
    consumer_secret: &str,
    token_secret: &str,
) {
    let base = signature_base_string(http_method, url, params);
    let key = format!(
        "{}&{}",
        oauth_encode(consumer_secret),
        oauth_encode(token_secret)
    );

    let mut mac =
        Hmac::<Sha1>::new_from_slice(key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(base.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());

    params.push(("oauth_signature".to_string(), signature));
}

/// The canonical base string: method, URL and the sorted, encoded parameters.
fn signature_base_string(http_method: &str, url: &str, params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (oauth_encode(k), oauth_encode(v)))
        .collect();
    encoded.sort();
    let joined = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    format!(
        "{}&{}&{}",
        http_method,
        oauth_encode(url),
        oauth_encode(&joined)
    )
}

fn oauth_encode(s: &str) -> String {
    utf8_percent_encode(s, OAUTH_ENCODE_SET).to_string()
}

/// Parse an `a=b&c=d` token response.
fn parse_form_response(body: &str) -> Result<AccessToken> {
    let mut oauth_token = None;
    let mut oauth_token_secret = None;
    for pair in body.trim().split('&') {
        if let Some((name, value)) = pair.split_once('=') {
            match name {
                "oauth_token" => oauth_token = Some(value.to_string()),
                "oauth_token_secret" => oauth_token_secret = Some(value.to_string()),
                _ => {}
            }
        }
    }
    match (oauth_token, oauth_token_secret) {
        (Some(oauth_token), Some(oauth_token_secret)) => Ok(AccessToken {
            oauth_token,
            oauth_token_secret,
        }),
        _ => Err(Error::Api(format!("unexpected token response: {}", body))),
    }
}

fn parse_photo(entry: &Value) -> FlickrPhoto {
    FlickrPhoto {
        id: text_or_number(&entry["id"]),
        title: entry["title"].as_str().unwrap_or_default().to_string(),
        date_taken: entry["datetaken"].as_str().unwrap_or_default().to_string(),
        latitude: number_field(&entry["latitude"]),
        thumbnail_url: entry["url_m"].as_str().unwrap_or_default().to_string(),
    }
}

/// Flickr is inconsistent about numbers vs strings across API versions.
fn number_field(value: &Value) -> f64 {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0.0)
}

fn text_or_number(value: &Value) -> String {
    value
        .as_str()
        .map(|s| s.to_string())
        .unwrap_or_else(|| value.to_string())
}

/// Adapter pushing positions to a Flickr album.
pub struct FlickrSync {
    client: FlickrClient,
    album: FlickrAlbum,
    user_id: String,
}

impl FlickrSync {
    pub fn new(client: FlickrClient, album: FlickrAlbum) -> Result<FlickrSync> {
        let user_id = client.lookup_user(&album.url)?;
        Ok(FlickrSync {
            client,
            album,
            user_id,
        })
    }

    fn photo_page_url(&self, photo: &FlickrPhoto) -> String {
        format!("https://www.flickr.com/photos/{}/{}", self.user_id, photo.id)
    }
}

impl SyncAdapter for FlickrSync {
    type Photo = FlickrPhoto;

    fn photos(&mut self) -> Result<Vec<FlickrPhoto>> {
        self.client.album_photos(&self.album)
    }

    fn describe(&self, photo: &FlickrPhoto) -> String {
        self.photo_page_url(photo)
    }

    fn capture_time(&mut self, photo: &FlickrPhoto) -> Result<CaptureTime> {
        let naive = NaiveDateTime::parse_from_str(&photo.date_taken, DATE_TAKEN_FORMAT)
            .map_err(|_| Error::Metadata {
                path: self.photo_page_url(photo),
                message: format!("unparseable date taken '{}'", photo.date_taken),
            })?;
        // Flickr exposes no timezone for the capture time.
        Ok(CaptureTime {
            naive,
            offset: None,
        })
    }

    fn write_position(&mut self, photo: &FlickrPhoto, position: Position) -> Result<()> {
        self.client.set_location(&photo.id, position)
    }

    fn clear_position(&mut self, photo: &FlickrPhoto) -> Result<()> {
        // Flickr reports latitude 0 for photos without a location; removing
        // a location from those is a pointless API call.
        if photo.latitude != 0.0 {
            self.client.remove_location(&photo.id)?;
        }
        Ok(())
    }

    fn placemark(&self, photo: &FlickrPhoto) -> Placemark {
        Placemark {
            name: self.photo_page_url(photo),
            image_src: photo.thumbnail_url.clone(),
            image_style: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_album_url() {
        let album =
            parse_album_url("https://www.flickr.com/photos/someone/albums/72157719999999999")
                .unwrap();
        assert_eq!(album.album_id, "72157719999999999");

        let album = parse_album_url("https://flickr.com/photos/someone/sets/123").unwrap();
        assert_eq!(album.album_id, "123");
    }

    #[test]
    fn test_parse_album_url_invalid() {
        assert!(parse_album_url("https://example.com/photos/x/albums/1").is_err());
        assert!(parse_album_url("https://www.flickr.com/photos/someone").is_err());
    }

    #[test]
    fn test_oauth_encode_unreserved() {
        assert_eq!(oauth_encode("abc-XYZ_0.9~"), "abc-XYZ_0.9~");
        assert_eq!(oauth_encode("a b&c=d"), "a%20b%26c%3Dd");
        assert_eq!(oauth_encode("http://x/y"), "http%3A%2F%2Fx%2Fy");
    }

    #[test]
    fn test_signature_base_string_sorted() {
        let params = vec![
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ];
        let base = signature_base_string("GET", "https://example.com/r", &params);
        assert_eq!(base, "GET&https%3A%2F%2Fexample.com%2Fr&a%3D1%26b%3D2");
    }

    #[test]
    fn test_append_signature_is_deterministic_base64() {
        let mut params = vec![("a".to_string(), "1".to_string())];
        append_signature("GET", "https://example.com/r", &mut params, "secret", "ts");
        let (name, signature) = params.last().unwrap();
        assert_eq!(name, "oauth_signature");
        // HMAC-SHA1 output is 20 bytes, so 28 base64 characters.
        assert_eq!(signature.len(), 28);

        let mut again = vec![("a".to_string(), "1".to_string())];
        append_signature("GET", "https://example.com/r", &mut again, "secret", "ts");
        assert_eq!(again.last().unwrap().1, *signature);

        let mut other_key = vec![("a".to_string(), "1".to_string())];
        append_signature("GET", "https://example.com/r", &mut other_key, "other", "ts");
        assert_ne!(other_key.last().unwrap().1, *signature);
    }

    #[test]
    fn test_parse_form_response() {
        let token =
            parse_form_response("oauth_token=abc&oauth_token_secret=def&extra=1").unwrap();
        assert_eq!(token.oauth_token, "abc");
        assert_eq!(token.oauth_token_secret, "def");
        assert!(parse_form_response("oauth_problem=consumer_key_unknown").is_err());
    }

    #[test]
    fn test_parse_photo_from_album_payload() {
        let payload: Value = serde_json::from_str(
            r#"{
                "id": "51234567890",
                "title": "Sunset",
                "datetaken": "2021-10-10 18:03:21",
                "latitude": "45.9645464",
                "longitude": "-108.276076",
                "url_m": "https://live.staticflickr.com/65535/51234567890_m.jpg"
            }"#,
        )
        .unwrap();
        let photo = parse_photo(&payload);
        assert_eq!(photo.id, "51234567890");
        assert_eq!(photo.title, "Sunset");
        assert_eq!(photo.date_taken, "2021-10-10 18:03:21");
        assert!((photo.latitude - 45.9645464).abs() < 1e-9);
        assert!(photo.thumbnail_url.ends_with("_m.jpg"));
    }

    #[test]
    fn test_parse_photo_without_geo() {
        let payload: Value =
            serde_json::from_str(r#"{"id": 123, "title": "x", "datetaken": "", "latitude": 0}"#)
                .unwrap();
        let photo = parse_photo(&payload);
        assert_eq!(photo.id, "123");
        assert_eq!(photo.latitude, 0.0);
    }
}
