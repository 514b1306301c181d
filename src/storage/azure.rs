//! Azure Blob Storage backend.
//!
//! Talks to the Blob service REST API with `reqwest`.  Every blob of one
//! virtual file system lives in a single container; the blob name is the
//! canonical key.
//!
//! Credentials come from a storage connection string:
//!   - `AccountName` + `AccountKey` (Shared Key auth)
//!   - `SharedAccessSignature` (SAS token appended to every URL)
//!   - `UseDevelopmentStorage=true` (local storage emulator)
//!
//! `DefaultEndpointsProtocol`, `EndpointSuffix` and `BlobEndpoint` choose
//! the service endpoint.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use reqwest::{Method, StatusCode};
use sha2::Sha256;
use std::collections::HashMap;
use tracing::{debug, info};

use super::backend::{
    BlobHttpHeaders, BlobProperties, BlobStore, ContainerAccess, ListItem, StoreFuture,
};
use crate::config::FileSystemConfig;
use crate::errors::{FsError, FsResult};

/// Azure REST API version used for all requests.
const AZURE_API_VERSION: &str = "2023-11-03";

/// Well-known account of the local storage emulator.
pub const EMULATOR_ACCOUNT: &str = "devstoreaccount1";

/// Well-known, publicly documented key of the local storage emulator.
pub const EMULATOR_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

/// Blob endpoint of the local storage emulator.
pub const EMULATOR_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

/// Prefix of user metadata headers.
const META_HEADER_PREFIX: &str = "x-ms-meta-";

/// Percent-encoding set for Azure blob names: encode everything except
/// unreserved characters and '/'.
const AZURE_BLOB_ENCODE_SET: percent_encoding::AsciiSet = percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Encoding set for query parameter values.
const AZURE_QUERY_ENCODE_SET: percent_encoding::AsciiSet = percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Azure authentication method.
#[derive(Clone, PartialEq, Eq)]
pub enum AzureAuth {
    /// Shared Key authentication using the storage account key.
    SharedKey { key_bytes: Vec<u8> },
    /// SAS token authentication (appended as query parameter).
    SasToken { token: String },
}

impl std::fmt::Debug for AzureAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AzureAuth::SharedKey { .. } => f.write_str("SharedKey(..)"),
            AzureAuth::SasToken { .. } => f.write_str("SasToken(..)"),
        }
    }
}

/// Account, endpoint and credential parsed from a connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageCredentials {
    pub account: String,
    /// Blob service endpoint without a trailing slash.
    pub blob_endpoint: String,
    pub auth: AzureAuth,
}

impl StorageCredentials {
    /// Parse an Azure storage connection string.
    pub fn parse(connection_string: &str) -> FsResult<Self> {
        let mut settings: HashMap<String, String> = HashMap::new();
        for part in connection_string.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part.split_once('=').ok_or_else(|| {
                FsError::config(format!("Malformed connection string segment '{part}'"))
            })?;
            settings.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
        let get = |key: &str| settings.get(key).filter(|v| !v.is_empty());

        if get("usedevelopmentstorage").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
            return Ok(Self::emulator());
        }

        let account = get("accountname")
            .cloned()
            .ok_or_else(|| FsError::config("Connection string is missing AccountName"))?;

        let blob_endpoint = match get("blobendpoint") {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => {
                let protocol = get("defaultendpointsprotocol")
                    .map(String::as_str)
                    .unwrap_or("https");
                let suffix = get("endpointsuffix")
                    .map(String::as_str)
                    .unwrap_or("core.windows.net");
                format!("{protocol}://{account}.blob.{suffix}")
            }
        };

        let auth = if let Some(key) = get("accountkey") {
            let key_bytes = BASE64_STANDARD.decode(key).map_err(|e| {
                FsError::config(format!("Invalid AccountKey in connection string: {e}"))
            })?;
            AzureAuth::SharedKey { key_bytes }
        } else if let Some(sas) = get("sharedaccesssignature") {
            AzureAuth::SasToken {
                token: sas.trim_start_matches('?').to_string(),
            }
        } else {
            return Err(FsError::config(
                "Connection string has neither AccountKey nor SharedAccessSignature",
            ));
        };

        Ok(Self {
            account,
            blob_endpoint,
            auth,
        })
    }

    /// Credentials of the local storage emulator.
    pub fn emulator() -> Self {
        Self {
            account: EMULATOR_ACCOUNT.to_string(),
            blob_endpoint: EMULATOR_BLOB_ENDPOINT.to_string(),
            auth: AzureAuth::SharedKey {
                key_bytes: BASE64_STANDARD
                    .decode(EMULATOR_ACCOUNT_KEY)
                    .unwrap_or_default(),
            },
        }
    }

    /// Path component of the endpoint (`/devstoreaccount1` on the emulator).
    fn endpoint_path(&self) -> String {
        reqwest::Url::parse(&self.blob_endpoint)
            .map(|url| url.path().trim_end_matches('/').to_string())
            .unwrap_or_default()
    }
}

/// One REST call against the container or a blob in it.
struct BlobRequest<'a> {
    method: Method,
    blob: Option<&'a str>,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    content_type: Option<String>,
    content_md5: Option<String>,
    body: Bytes,
}

impl<'a> BlobRequest<'a> {
    fn new(method: Method, blob: Option<&'a str>) -> Self {
        Self {
            method,
            blob,
            query: Vec::new(),
            headers: Vec::new(),
            content_type: None,
            content_md5: None,
            body: Bytes::new(),
        }
    }

    fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }
}

/// [`BlobStore`] backed by one Azure Blob Storage container.
pub struct AzureBlobStore {
    /// HTTP client for Azure Blob REST API calls.
    client: reqwest::Client,
    credentials: StorageCredentials,
    container: String,
}

impl AzureBlobStore {
    pub fn new(connection_string: &str, container: &str) -> FsResult<Self> {
        let credentials = StorageCredentials::parse(connection_string)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| FsError::connection(format!("Failed to create HTTP client: {e}")))?;

        info!(
            "Azure blob store initialized: account={} endpoint={} container={}",
            credentials.account, credentials.blob_endpoint, container
        );

        Ok(Self {
            client,
            credentials,
            container: container.to_string(),
        })
    }

    pub fn from_config(config: &FileSystemConfig) -> FsResult<Self> {
        Self::new(config.connection_string(), config.container_name())
    }

    /// URL of the container, or of `blob` inside it.
    fn resource_url(&self, blob: Option<&str>) -> String {
        match blob {
            Some(blob) => format!(
                "{}/{}/{}",
                self.credentials.blob_endpoint,
                self.container,
                percent_encoding::utf8_percent_encode(blob, &AZURE_BLOB_ENCODE_SET)
            ),
            None => format!("{}/{}", self.credentials.blob_endpoint, self.container),
        }
    }

    fn request_url(&self, blob: Option<&str>, query: &[(String, String)]) -> String {
        let mut url = self.resource_url(blob);
        let mut params: Vec<String> = query
            .iter()
            .map(|(k, v)| {
                format!(
                    "{}={}",
                    k,
                    percent_encoding::utf8_percent_encode(v, &AZURE_QUERY_ENCODE_SET)
                )
            })
            .collect();
        if let AzureAuth::SasToken { token } = &self.credentials.auth {
            params.push(token.clone());
        }
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }
        url
    }

    /// Canonicalized resource of a request.
    ///
    /// The blob name is used un-encoded; query parameters follow sorted by
    /// key, one `\nkey:value` line each.
    fn canonicalized_resource(&self, blob: Option<&str>, query: &[(String, String)]) -> String {
        let mut resource = format!(
            "/{}{}/{}",
            self.credentials.account,
            self.credentials.endpoint_path(),
            self.container
        );
        if let Some(blob) = blob {
            resource.push('/');
            resource.push_str(blob);
        }
        let mut sorted_params = query.to_vec();
        sorted_params.sort_by(|a, b| a.0.cmp(&b.0));
        for (k, v) in &sorted_params {
            resource.push_str(&format!("\n{}:{}", k.to_lowercase(), v));
        }
        resource
    }

    /// Sign a request using Azure Shared Key authentication and return
    /// the Authorization header value.
    fn sign_request(
        &self,
        key_bytes: &[u8],
        request: &BlobRequest<'_>,
        date: &str,
    ) -> FsResult<String> {
        // Build canonicalized headers (x-ms-* headers, sorted).
        let mut ms_headers: Vec<(String, String)> = vec![
            ("x-ms-date".to_string(), date.to_string()),
            ("x-ms-version".to_string(), AZURE_API_VERSION.to_string()),
        ];
        for (k, v) in &request.headers {
            let lk = k.to_lowercase();
            if lk.starts_with("x-ms-") {
                ms_headers.push((lk, v.trim().to_string()));
            }
        }
        ms_headers.sort_by(|a, b| a.0.cmp(&b.0));
        let canonicalized_headers = ms_headers
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join("\n");

        let string_to_sign = string_to_sign(
            request.method.as_str(),
            request.body.len(),
            request.content_md5.as_deref().unwrap_or(""),
            request.content_type.as_deref().unwrap_or(""),
            &canonicalized_headers,
            &self.canonicalized_resource(request.blob, &request.query),
        );

        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(key_bytes)
            .map_err(|e| FsError::config(format!("HMAC key error: {e}")))?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

        Ok(format!("SharedKey {}:{}", self.credentials.account, signature))
    }

    /// Get the current UTC date in RFC 1123 format for Azure headers.
    fn rfc1123_date() -> String {
        httpdate::fmt_http_date(std::time::SystemTime::now())
    }

    /// Base64 MD5 digest, as sent in `Content-MD5`.
    fn compute_md5(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        BASE64_STANDARD.encode(hasher.finalize())
    }

    async fn send(&self, request: BlobRequest<'_>, context: &str) -> FsResult<reqwest::Response> {
        let date = Self::rfc1123_date();
        let url = self.request_url(request.blob, &request.query);

        let mut req = self
            .client
            .request(request.method.clone(), &url)
            .header("x-ms-date", &date)
            .header("x-ms-version", AZURE_API_VERSION);
        for (k, v) in &request.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(content_type) = &request.content_type {
            req = req.header("Content-Type", content_type.as_str());
        }
        if let Some(md5) = &request.content_md5 {
            req = req.header("Content-MD5", md5.as_str());
        }
        if let AzureAuth::SharedKey { key_bytes } = &self.credentials.auth {
            let auth_header = self.sign_request(key_bytes, &request, &date)?;
            req = req.header("Authorization", auth_header);
        }
        if request.method == Method::PUT {
            req = req.body(request.body.clone());
        }

        req.send()
            .await
            .map_err(|e| FsError::connection(format!("Azure {context} request failed: {e}")))
    }

    /// Turn an unsuccessful response into an error.
    async fn error_from(context: &str, resp: reqwest::Response) -> FsError {
        let status = resp.status();
        let code = error_code(&resp);
        let body = resp.text().await.unwrap_or_default();
        map_azure_error(context, status, &code, &body)
    }

    // -- Azure Blob REST API operations ----------------------------------------

    async fn azure_create_container(&self, access: ContainerAccess) -> FsResult<()> {
        let mut request =
            BlobRequest::new(Method::PUT, None).query("restype", "container");
        if access == ContainerAccess::Blob {
            request = request.header("x-ms-blob-public-access", "blob");
        }
        let resp = self.send(request, "create_container").await?;
        let status = resp.status();
        if status.is_success() {
            info!("Created blob container {}", self.container);
            return Ok(());
        }
        let code = error_code(&resp);
        if status == StatusCode::CONFLICT && code == "ContainerAlreadyExists" {
            debug!("Blob container {} already exists", self.container);
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && code == "InvalidResourceName" {
            return Err(FsError::InvalidContainerName {
                name: self.container.clone(),
                reason: "rejected by the blob service".to_string(),
            });
        }
        Err(map_azure_error("create_container", status, &code, &body))
    }

    async fn azure_set_container_acl(&self, access: ContainerAccess) -> FsResult<()> {
        let mut request = BlobRequest::new(Method::PUT, None)
            .query("comp", "acl")
            .query("restype", "container");
        if access == ContainerAccess::Blob {
            request = request.header("x-ms-blob-public-access", "blob");
        }
        let resp = self.send(request, "set_container_acl").await?;
        if !resp.status().is_success() {
            return Err(Self::error_from("set_container_acl", resp).await);
        }
        Ok(())
    }

    async fn azure_upload(&self, blob: &str, data: Bytes, headers: BlobHttpHeaders) -> FsResult<()> {
        let mut request = BlobRequest::new(Method::PUT, Some(blob))
            .header("x-ms-blob-type", "BlockBlob");
        if let Some(cache_control) = &headers.cache_control {
            request = request.header("x-ms-blob-cache-control", cache_control);
        }
        request.content_md5 = Some(Self::compute_md5(&data));
        request.content_type = headers.content_type;
        request.body = data;

        let resp = self.send(request, "upload").await?;
        if !resp.status().is_success() {
            return Err(Self::error_from("upload", resp).await);
        }
        Ok(())
    }

    async fn azure_download(&self, blob: &str) -> FsResult<Option<Bytes>> {
        let resp = self
            .send(BlobRequest::new(Method::GET, Some(blob)), "download")
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::error_from("download", resp).await);
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| FsError::connection(format!("Azure download body read failed: {e}")))?;
        Ok(Some(body))
    }

    /// Delete a blob and its snapshots. Idempotent (ignores 404).
    async fn azure_delete(&self, blob: &str) -> FsResult<()> {
        let request = BlobRequest::new(Method::DELETE, Some(blob))
            .header("x-ms-delete-snapshots", "include");
        let resp = self.send(request, "delete").await?;
        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            return Err(Self::error_from("delete", resp).await);
        }
        Ok(())
    }

    async fn azure_properties(&self, blob: &str) -> FsResult<Option<BlobProperties>> {
        let resp = self
            .send(BlobRequest::new(Method::HEAD, Some(blob)), "get_properties")
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::error_from("get_properties", resp).await);
        }
        properties_from_headers(resp.headers()).map(Some)
    }

    async fn azure_set_metadata(
        &self,
        blob: &str,
        metadata: HashMap<String, String>,
    ) -> FsResult<()> {
        let mut request = BlobRequest::new(Method::PUT, Some(blob)).query("comp", "metadata");
        let mut names: Vec<_> = metadata.into_iter().collect();
        names.sort();
        for (name, value) in names {
            request = request.header(&format!("{META_HEADER_PREFIX}{name}"), &value);
        }
        let resp = self.send(request, "set_metadata").await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(FsError::NotFound {
                path: blob.to_string(),
            });
        }
        if !resp.status().is_success() {
            return Err(Self::error_from("set_metadata", resp).await);
        }
        Ok(())
    }

    /// List Blobs, following `NextMarker` until the listing is complete.
    async fn azure_list_blobs(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> FsResult<Vec<ListItem>> {
        let mut items = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut request = BlobRequest::new(Method::GET, None)
                .query("restype", "container")
                .query("comp", "list");
            if !prefix.is_empty() {
                request = request.query("prefix", prefix);
            }
            if let Some(delimiter) = delimiter {
                request = request.query("delimiter", delimiter);
            }
            if let Some(m) = &marker {
                request = request.query("marker", m);
            }

            let resp = self.send(request, "list_blobs").await?;
            if !resp.status().is_success() {
                return Err(Self::error_from("list_blobs", resp).await);
            }
            let body = resp
                .text()
                .await
                .map_err(|e| FsError::connection(format!("Azure list body read failed: {e}")))?;

            let (page, next_marker) = parse_list_response(&body)?;
            items.extend(page);

            match next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        Ok(items)
    }
}

impl BlobStore for AzureBlobStore {
    fn ensure_container(&self, access: ContainerAccess) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            debug!(
                "Azure ensure_container: container={} access={:?}",
                self.container, access
            );
            self.azure_create_container(access).await?;
            self.azure_set_container_acl(access).await
        })
    }

    fn exists(&self, key: &str) -> StoreFuture<'_, bool> {
        let key = key.to_string();
        Box::pin(async move {
            debug!("Azure exists: container={} blob={}", self.container, key);
            Ok(self.azure_properties(&key).await?.is_some())
        })
    }

    fn put(&self, key: &str, data: Bytes, headers: BlobHttpHeaders) -> StoreFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            debug!(
                "Azure put: container={} blob={} size={}",
                self.container,
                key,
                data.len()
            );
            self.azure_upload(&key, data, headers).await
        })
    }

    fn get(&self, key: &str) -> StoreFuture<'_, Option<Bytes>> {
        let key = key.to_string();
        Box::pin(async move {
            debug!("Azure get: container={} blob={}", self.container, key);
            self.azure_download(&key).await
        })
    }

    fn delete(&self, key: &str) -> StoreFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            debug!("Azure delete: container={} blob={}", self.container, key);
            self.azure_delete(&key).await
        })
    }

    fn get_properties(&self, key: &str) -> StoreFuture<'_, Option<BlobProperties>> {
        let key = key.to_string();
        Box::pin(async move {
            debug!(
                "Azure get_properties: container={} blob={}",
                self.container, key
            );
            self.azure_properties(&key).await
        })
    }

    fn set_metadata(&self, key: &str, metadata: HashMap<String, String>) -> StoreFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            debug!(
                "Azure set_metadata: container={} blob={}",
                self.container, key
            );
            self.azure_set_metadata(&key, metadata).await
        })
    }

    fn list(&self, prefix: &str, delimiter: Option<&str>) -> StoreFuture<'_, Vec<ListItem>> {
        let prefix = prefix.to_string();
        let delimiter = delimiter.map(str::to_string);
        Box::pin(async move {
            debug!(
                "Azure list: container={} prefix='{}' delimiter={:?}",
                self.container, prefix, delimiter
            );
            self.azure_list_blobs(&prefix, delimiter.as_deref()).await
        })
    }
}

// -- Helpers -----------------------------------------------------------------

/// Shared Key string-to-sign.
///
/// ```text
/// VERB\n
/// Content-Encoding\n
/// Content-Language\n
/// Content-Length\n
/// Content-MD5\n
/// Content-Type\n
/// Date\n
/// If-Modified-Since\n
/// If-Match\n
/// If-None-Match\n
/// If-Unmodified-Since\n
/// Range\n
/// CanonicalizedHeaders\n
/// CanonicalizedResource
/// ```
fn string_to_sign(
    method: &str,
    content_length: usize,
    content_md5: &str,
    content_type: &str,
    canonicalized_headers: &str,
    canonicalized_resource: &str,
) -> String {
    // Content-Length is empty for 0.
    let content_length = match content_length {
        0 => String::new(),
        len => len.to_string(),
    };
    format!(
        "{method}\n\n\n{content_length}\n{content_md5}\n{content_type}\n\n\n\n\n\n\n{canonicalized_headers}\n{canonicalized_resource}"
    )
}

fn error_code(resp: &reqwest::Response) -> String {
    resp.headers()
        .get("x-ms-error-code")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Map an Azure HTTP error to an [`FsError`].
///
/// Rejected credentials are connection failures; everything else is a
/// storage error carrying the status and body.
fn map_azure_error(context: &str, status: StatusCode, code: &str, body: &str) -> FsError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            FsError::connection(format!("Azure {context}: HTTP {status} {code}"))
        }
        _ => FsError::Storage(anyhow::anyhow!(
            "Azure {}: HTTP {} {} - {}",
            context,
            status,
            code,
            body
        )),
    }
}

/// Fails when `Last-Modified` is missing or not an HTTP date.
fn properties_from_headers(headers: &reqwest::header::HeaderMap) -> FsResult<BlobProperties> {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let last_modified = text("last-modified")
        .and_then(|v| httpdate::parse_http_date(&v).ok())
        .map(DateTime::<Utc>::from)
        .ok_or_else(|| {
            FsError::Storage(anyhow::anyhow!(
                "Blob properties lack a valid Last-Modified header"
            ))
        })?;
    let content_length = text("content-length")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    let metadata = headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str().strip_prefix(META_HEADER_PREFIX)?;
            Some((name.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect();

    Ok(BlobProperties {
        last_modified,
        content_length,
        content_type: text("content-type"),
        cache_control: text("cache-control"),
        metadata,
    })
}

/// Parse one page of a List Blobs response.
///
/// Returns the blobs and blob prefixes in document order plus the
/// continuation marker, if any.
fn parse_list_response(xml: &str) -> FsResult<(Vec<ListItem>, Option<String>)> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.trim_text(true);

    let mut items = Vec::new();
    let mut next_marker = None;
    let mut path: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                path.push(String::from_utf8_lossy(e.name().as_ref()).to_string());
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| FsError::Storage(anyhow::anyhow!("Malformed list XML: {e}")))?
                    .to_string();
                let n = path.len();
                let tag = path.last().map(String::as_str);
                let parent = n.checked_sub(2).map(|i| path[i].as_str());
                match (parent, tag) {
                    (Some("Blob"), Some("Name")) => items.push(ListItem::Blob(text)),
                    (Some("BlobPrefix"), Some("Name")) => items.push(ListItem::Prefix(text)),
                    (Some("EnumerationResults"), Some("NextMarker")) if !text.is_empty() => {
                        next_marker = Some(text)
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(FsError::Storage(anyhow::anyhow!("Malformed list XML: {e}")));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok((items, next_marker))
}

// -- Tests -------------------------------------------------------------------
