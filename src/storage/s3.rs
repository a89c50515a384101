//! Amazon S3 object store.
//!
//! Talks to the S3 REST API directly with AWS Signature V4 authentication.
//! Handles `ListObjectsV2` pagination, server-side copy, and custom
//! endpoints for S3-compatible services (MinIO, LocalStack), which are
//! addressed path-style.
//!
//! Uses only pure-Rust dependencies: `hmac` and `sha2` for signing, `quick-xml`
//! for response bodies.
//!
//! # Authentication
//!
//! All requests are signed using
//! [AWS Signature Version 4](https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-auth-using-authorization-header.html).
//!
//! # Retries
//!
//! GET, HEAD, and LIST go through [`send_idempotent`]; PUT and COPY are sent
//! exactly once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use sha2::{Digest, Sha256};

use super::{Listing, ObjectInfo, ObjectLocation, ObjectStore, StoreError};
use crate::http::{send_idempotent, RetryPolicy};
use crate::models::{AwsCredentials, RawBucket};

type HmacSha256 = Hmac<Sha256>;

/// An S3 client bound to one set of credentials and one signing region.
#[derive(Clone)]
pub struct S3Store {
    client: reqwest::Client,
    creds: AwsCredentials,
    region: String,
    /// Custom endpoint (`http://localhost:9000`); path-style addressing.
    endpoint: Option<String>,
    retry: RetryPolicy,
}

impl S3Store {
    pub fn new(
        client: reqwest::Client,
        creds: AwsCredentials,
        region: impl Into<String>,
        endpoint: Option<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            creds,
            region: region.into(),
            endpoint,
            retry,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Scheme, host, and canonical path for a bucket/key pair.
    fn address(&self, bucket: Option<&str>, key: &str) -> (String, String, String) {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        match (&self.endpoint, bucket) {
            (Some(endpoint), bucket) => {
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                let path = match bucket {
                    Some(b) if key.is_empty() => format!("/{}", b),
                    Some(b) => format!("/{}/{}", b, encoded_key),
                    None => "/".to_string(),
                };
                (scheme.to_string(), host, path)
            }
            (None, Some(b)) => (
                "https".to_string(),
                format!("{}.s3.{}.amazonaws.com", b, self.region),
                format!("/{}", encoded_key),
            ),
            (None, None) => (
                "https".to_string(),
                format!("s3.{}.amazonaws.com", self.region),
                "/".to_string(),
            ),
        }
    }

    /// Build a SigV4-signed request.
    ///
    /// `extra_headers` must be lowercase `x-amz-*` headers; they are signed
    /// along with `host`, `x-amz-content-sha256`, and `x-amz-date`.
    fn signed(
        &self,
        method: Method,
        bucket: Option<&str>,
        key: &str,
        query: &[(&str, String)],
        payload: &[u8],
        extra_headers: &[(&str, String)],
    ) -> RequestBuilder {
        let (scheme, host, canonical_uri) = self.address(bucket, key);

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut sorted_params: Vec<(&str, &str)> =
            query.iter().map(|(k, v)| (*k, v.as_str())).collect();
        sorted_params.sort();
        let canonical_querystring: String = sorted_params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let payload_hash = hex_sha256(payload);

        let mut headers: Vec<(String, String)> = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        for (k, v) in extra_headers {
            headers.push((k.to_string(), v.clone()));
        }
        headers.sort();

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method.as_str(),
            canonical_uri,
            canonical_querystring,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key =
            derive_signing_key(&self.creds.secret_access_key, &date_stamp, &self.region, "s3");
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let url = if canonical_querystring.is_empty() {
            format!("{}://{}{}", scheme, host, canonical_uri)
        } else {
            format!("{}://{}{}?{}", scheme, host, canonical_uri, canonical_querystring)
        };

        let mut builder = self
            .client
            .request(method, &url)
            .header("Authorization", authorization);
        for (k, v) in headers.into_iter().filter(|(k, _)| k != "host") {
            builder = builder.header(k, v);
        }
        builder
    }

    async fn check(
        resp: Response,
        operation: &'static str,
        bucket: &str,
        key: &str,
    ) -> Result<Response, StoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        match status {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            StatusCode::FORBIDDEN => Err(StoreError::AccessDenied {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            _ => {
                let body = resp.text().await.unwrap_or_default();
                Err(StoreError::Http {
                    operation,
                    status: status.as_u16(),
                    body: body.chars().take(500).collect(),
                })
            }
        }
    }

    async fn bucket_region(&self, bucket: &str) -> Result<String, StoreError> {
        let resp = send_idempotent(&self.retry, "GetBucketLocation", || {
            self.signed(
                Method::GET,
                Some(bucket),
                "",
                &[("location", String::new())],
                b"",
                &[],
            )
        })
        .await?;
        let resp = Self::check(resp, "GetBucketLocation", bucket, "").await?;
        let xml = resp.text().await?;
        parse_location_constraint(&xml)
    }
}

fn version_query(location: &ObjectLocation) -> Vec<(&'static str, String)> {
    location
        .version_id
        .as_ref()
        .map(|v| vec![("versionId", v.clone())])
        .unwrap_or_default()
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get(&self, location: &ObjectLocation) -> Result<Vec<u8>, StoreError> {
        let query = version_query(location);
        let resp = send_idempotent(&self.retry, "GetObject", || {
            self.signed(Method::GET, Some(&location.bucket), &location.key, &query, b"", &[])
        })
        .await?;
        let resp = Self::check(resp, "GetObject", &location.bucket, &location.key).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    async fn head(&self, location: &ObjectLocation) -> Result<ObjectInfo, StoreError> {
        let query = version_query(location);
        let resp = send_idempotent(&self.retry, "HeadObject", || {
            self.signed(Method::HEAD, Some(&location.bucket), &location.key, &query, b"", &[])
        })
        .await?;
        let resp = Self::check(resp, "HeadObject", &location.bucket, &location.key).await?;
        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        Ok(ObjectInfo {
            bucket: location.bucket.clone(),
            key: location.key.clone(),
            size: header("content-length")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            last_modified: header("last-modified")
                .and_then(|s| DateTime::parse_from_rfc2822(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            etag: header("etag").map(|e| e.trim_matches('"').to_string()),
            version_id: header("x-amz-version-id").or_else(|| location.version_id.clone()),
        })
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        let resp = self
            .signed(Method::PUT, Some(bucket), key, &[], &body, &[])
            .body(body)
            .send()
            .await?;
        Self::check(resp, "PutObject", bucket, key).await?;
        Ok(())
    }

    async fn copy(
        &self,
        source: &ObjectLocation,
        bucket: &str,
        key: &str,
    ) -> Result<ObjectLocation, StoreError> {
        let encoded_src = source
            .key
            .split('/')
            .map(uri_encode)
            .collect::<Vec<_>>()
            .join("/");
        let mut copy_source = format!("/{}/{}", source.bucket, encoded_src);
        if let Some(ref v) = source.version_id {
            copy_source.push_str(&format!("?versionId={}", v));
        }
        let resp = self
            .signed(
                Method::PUT,
                Some(bucket),
                key,
                &[],
                b"",
                &[("x-amz-copy-source", copy_source)],
            )
            .send()
            .await?;
        let resp = Self::check(resp, "CopyObject", &source.bucket, &source.key).await?;
        let version_id = resp
            .headers()
            .get("x-amz-version-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        // CopyObject can report failure inside a 200 body.
        let body = resp.text().await?;
        if copy_failed(&body) {
            return Err(StoreError::Http {
                operation: "CopyObject",
                status: 200,
                body: body.chars().take(500).collect(),
            });
        }
        Ok(ObjectLocation {
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id,
        })
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> Result<Listing, StoreError> {
        let mut listing = Listing::default();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type", "2".to_string()),
                ("max-keys", "1000".to_string()),
            ];
            if !prefix.is_empty() {
                query.push(("prefix", prefix.to_string()));
            }
            if let Some(d) = delimiter {
                query.push(("delimiter", d.to_string()));
            }
            if let Some(ref token) = continuation_token {
                query.push(("continuation-token", token.clone()));
            }

            let resp = send_idempotent(&self.retry, "ListObjectsV2", || {
                self.signed(Method::GET, Some(bucket), "", &query, b"", &[])
            })
            .await?;
            let resp = Self::check(resp, "ListObjectsV2", bucket, prefix).await?;
            let xml = resp.text().await?;
            let page = parse_list_objects_response(bucket, &xml)?;
            listing.objects.extend(page.objects);
            listing.common_prefixes.extend(page.common_prefixes);

            match (page.is_truncated, page.next_token) {
                (true, Some(token)) => continuation_token = Some(token),
                (true, None) => {
                    return Err(StoreError::Malformed(
                        "truncated listing without continuation token".into(),
                    ))
                }
                (false, _) => break,
            }
        }

        Ok(listing)
    }

    async fn list_buckets(&self) -> Result<Vec<RawBucket>, StoreError> {
        let resp = send_idempotent(&self.retry, "ListBuckets", || {
            self.signed(Method::GET, None, "", &[], b"", &[])
        })
        .await?;
        let resp = Self::check(resp, "ListBuckets", "", "").await?;
        let xml = resp.text().await?;

        let mut buckets = Vec::new();
        for name in parse_list_buckets(&xml)? {
            let region = match name {
                Some(ref n) => match self.bucket_region(n).await {
                    Ok(r) => Some(r),
                    Err(e) => {
                        tracing::debug!(bucket = %n, error = %e, "bucket region unavailable");
                        None
                    }
                },
                None => None,
            };
            buckets.push(RawBucket {
                name,
                region,
                access: None,
            });
        }
        Ok(buckets)
    }
}

// ============ AWS SigV4 Helpers ============

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode per RFC 3986, leaving only `A-Z a-z 0-9 - _ . ~` unescaped.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

// ============ XML Parsing ============

#[derive(Default)]
struct ListPage {
    objects: Vec<ObjectInfo>,
    common_prefixes: Vec<String>,
    is_truncated: bool,
    next_token: Option<String>,
}

fn parse_list_objects_response(bucket: &str, xml: &str) -> Result<ListPage, StoreError> {
    let mut page = ListPage::default();
    let mut root = None;
    let mut current = ObjectInfo {
        bucket: bucket.to_string(),
        ..ObjectInfo::default()
    };

    for_each_element(xml, |path, text| {
        if root.is_none() {
            root = path.first().map(|r| r.to_string());
        }
        match path {
            [_, "IsTruncated"] => page.is_truncated = text == "true",
            [_, "NextContinuationToken"] => page.next_token = Some(text.to_string()),
            [_, "Contents", "Key"] => current.key = text.to_string(),
            [_, "Contents", "Size"] => current.size = text.parse().unwrap_or(0),
            [_, "Contents", "LastModified"] => {
                current.last_modified = DateTime::parse_from_rfc3339(text)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc));
            }
            [_, "Contents", "ETag"] => current.etag = Some(text.trim_matches('"').to_string()),
            [_, "Contents"] => {
                let object = std::mem::replace(
                    &mut current,
                    ObjectInfo {
                        bucket: bucket.to_string(),
                        ..ObjectInfo::default()
                    },
                );
                // Zero-byte "directory" markers are not objects.
                if !object.key.is_empty() && !object.key.ends_with('/') {
                    page.objects.push(object);
                }
            }
            [_, "CommonPrefixes", "Prefix"] => page.common_prefixes.push(text.to_string()),
            _ => {}
        }
    })?;

    if root.as_deref() != Some("ListBucketResult") {
        return Err(StoreError::Malformed(
            xml.chars().take(200).collect::<String>(),
        ));
    }
    Ok(page)
}

/// Whether a 200 `CopyObject` body is an `<Error>` document.
fn copy_failed(body: &str) -> bool {
    let mut root = None;
    let parsed = for_each_element(body, |path, _| {
        if root.is_none() {
            root = path.first().map(|r| r.to_string());
        }
    });
    parsed.is_err() || root.as_deref() == Some("Error")
}

/// Bucket names from a `ListBuckets` response, one entry per `<Bucket>`.
fn parse_list_buckets(xml: &str) -> Result<Vec<Option<String>>, StoreError> {
    let mut names = Vec::new();
    let mut name = None;
    for_each_element(xml, |path, text| match path {
        [.., "Buckets", "Bucket", "Name"] => name = Some(text.to_string()),
        [.., "Buckets", "Bucket"] => names.push(name.take()),
        _ => {}
    })?;
    Ok(names)
}

/// `GetBucketLocation` returns an empty constraint for `us-east-1`.
fn parse_location_constraint(xml: &str) -> Result<String, StoreError> {
    let mut region = String::new();
    for_each_element(xml, |path, text| {
        if let ["LocationConstraint"] = path {
            region = text.to_string();
        }
    })?;
    if region.is_empty() {
        region = "us-east-1".to_string();
    }
    Ok(region)
}

/// Walk every closed element, passing the local-name path from the root
/// and the element's entity-decoded text. Whitespace is kept as-is, since
/// object keys may carry it.
fn for_each_element(xml: &str, mut f: impl FnMut(&[&str], &str)) -> Result<(), StoreError> {
    let mut reader = quick_xml::Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();

    let malformed = |e: &dyn std::fmt::Display| StoreError::Malformed(e.to_string());

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                text.clear();
            }
            Ok(quick_xml::events::Event::Empty(e)) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                f(&names(&path), "");
                path.pop();
                text.clear();
            }
            Ok(quick_xml::events::Event::Text(te)) => {
                text.push_str(te.unescape().map_err(|e| malformed(&e))?.as_ref());
            }
            Ok(quick_xml::events::Event::CData(cd)) => {
                text.push_str(&String::from_utf8_lossy(&cd.into_inner()));
            }
            Ok(quick_xml::events::Event::End(_)) => {
                f(&names(&path), &text);
                path.pop();
                text.clear();
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(malformed(&e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

fn names(path: &[String]) -> Vec<&str> {
    path.iter().map(String::as_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_key_matches_aws_example() {
        // Example from the AWS SigV4 documentation.
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("a b/c~d"), "a%20b%2Fc~d");
        assert_eq!(uri_encode("data_v1.csv"), "data_v1.csv");
    }

    #[test]
    fn test_parse_listing_with_prefixes_and_markers() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>bkt</Name>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>tok-2</NextContinuationToken>
  <Contents><Key>raw/</Key><Size>0</Size></Contents>
  <Contents>
    <Key>raw/a&amp;b.csv</Key>
    <LastModified>2024-03-01T12:00:00.000Z</LastModified>
    <ETag>&quot;abc&quot;</ETag>
    <Size>42</Size>
  </Contents>
  <CommonPrefixes><Prefix>raw/nested/</Prefix></CommonPrefixes>
</ListBucketResult>"#;
        let page = parse_list_objects_response("bkt", xml).unwrap();
        assert!(page.is_truncated);
        assert_eq!(page.next_token.as_deref(), Some("tok-2"));
        assert_eq!(page.objects.len(), 1);
        assert_eq!(page.objects[0].key, "raw/a&b.csv");
        assert_eq!(page.objects[0].size, 42);
        assert_eq!(page.objects[0].etag.as_deref(), Some("abc"));
        assert!(page.objects[0].last_modified.is_some());
        assert_eq!(page.common_prefixes, vec!["raw/nested/".to_string()]);
    }

    #[test]
    fn test_parse_listing_rejects_error_document() {
        let xml = "<Error><Code>NoSuchBucket</Code></Error>";
        assert!(matches!(
            parse_list_objects_response("bkt", xml),
            Err(StoreError::Malformed(_))
        ));
    }

    #[test]
    fn test_location_constraint_default() {
        assert_eq!(
            parse_location_constraint("<LocationConstraint></LocationConstraint>").unwrap(),
            "us-east-1"
        );
        assert_eq!(
            parse_location_constraint(
                r#"<LocationConstraint xmlns="http://s3.amazonaws.com/doc/2006-03-01/">eu-west-1</LocationConstraint>"#
            )
            .unwrap(),
            "eu-west-1"
        );
        assert_eq!(parse_location_constraint("<LocationConstraint/>").unwrap(), "us-east-1");
    }

    #[test]
    fn test_listing_decodes_character_references() {
        let xml = r#"<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <KeyCount>2</KeyCount>
  <Contents><Key>raw/line&#13;break.csv</Key><Size>4</Size></Contents>
  <Contents><Key>raw/a&#x26;b &lt;v2&gt;.csv</Key><Size>5</Size></Contents>
  <Contents><Key> padded.csv </Key><Size>6</Size></Contents>
</ListBucketResult>"#;
        let page = parse_list_objects_response("bkt", xml).unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["raw/line\rbreak.csv", "raw/a&b <v2>.csv", " padded.csv "]);
        assert_eq!(page.objects[0].bucket, "bkt");
        assert_eq!(page.objects[2].size, 6);
    }

    #[test]
    fn test_parse_list_buckets() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListAllMyBucketsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Owner><ID>abc</ID><DisplayName>owner</DisplayName></Owner>
  <Buckets>
    <Bucket><Name>team-data</Name><CreationDate>2024-01-01T00:00:00.000Z</CreationDate></Bucket>
    <Bucket><CreationDate>2024-01-02T00:00:00.000Z</CreationDate></Bucket>
    <Bucket><Name>logs&amp;more</Name></Bucket>
  </Buckets>
</ListAllMyBucketsResult>"#;
        assert_eq!(
            parse_list_buckets(xml).unwrap(),
            vec![Some("team-data".to_string()), None, Some("logs&more".to_string())]
        );
    }

    #[test]
    fn test_copy_error_body_detected() {
        assert!(copy_failed(
            "<?xml version=\"1.0\"?>\n<Error><Code>InternalError</Code></Error>"
        ));
        assert!(!copy_failed(
            "<CopyObjectResult><ETag>\"e\"</ETag><Message>&lt;Error&gt;</Message></CopyObjectResult>"
        ));
    }

    #[test]
    fn test_path_style_address_for_custom_endpoint() {
        let store = S3Store::new(
            reqwest::Client::new(),
            AwsCredentials {
                access_key_id: "AK".into(),
                secret_access_key: "SK".into(),
                session_token: None,
            },
            "us-east-1",
            Some("http://localhost:9000/".into()),
            RetryPolicy::none(),
        );
        let (scheme, host, path) = store.address(Some("bkt"), "a b.csv");
        assert_eq!(scheme, "http");
        assert_eq!(host, "localhost:9000");
        assert_eq!(path, "/bkt/a%20b.csv");
    }
}
