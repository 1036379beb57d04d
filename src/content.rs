use http::HeaderMap;
use http::header::{
    CONTENT_DISPOSITION, CONTENT_ENCODING, CONTENT_LANGUAGE, CONTENT_LENGTH, CONTENT_TYPE, EXPIRES,
    HeaderName, HeaderValue,
};
use tracing::debug;

const CONTENT_HEADERS: [HeaderName; 6] = [
    CONTENT_LENGTH,
    CONTENT_TYPE,
    CONTENT_ENCODING,
    CONTENT_DISPOSITION,
    CONTENT_LANGUAGE,
    EXPIRES,
];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentMetadata {
    length: Option<u64>,
    content_type: Option<String>,
    content_encoding: Option<String>,
    content_disposition: Option<String>,
    content_language: Option<String>,
    expires: Option<String>,
}

impl ContentMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.content_encoding.as_deref()
    }

    pub fn content_disposition(&self) -> Option<&str> {
        self.content_disposition.as_deref()
    }

    pub fn content_language(&self) -> Option<&str> {
        self.content_language.as_deref()
    }

    pub fn expires(&self) -> Option<&str> {
        self.expires.as_deref()
    }

    /// `filename` parameter of the content disposition, unquoted.
    pub fn filename(&self) -> Option<&str> {
        let disposition = self.content_disposition.as_deref()?;
        disposition.split(';').skip(1).find_map(|parameter| {
            let (name, value) = parameter.split_once('=')?;
            if !name.trim().eq_ignore_ascii_case("filename") {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|inner| inner.strip_suffix('"'))
                .unwrap_or(value);
            (!value.is_empty()).then_some(value)
        })
    }

    pub fn set_length(&mut self, length: Option<u64>) {
        self.length = length;
    }

    pub fn set_content_type(&mut self, content_type: Option<String>) {
        self.content_type = content_type;
    }

    pub fn set_content_encoding(&mut self, content_encoding: Option<String>) {
        self.content_encoding = content_encoding;
    }

    pub fn set_content_disposition(&mut self, content_disposition: Option<String>) {
        self.content_disposition = content_disposition;
    }

    pub fn set_content_language(&mut self, content_language: Option<String>) {
        self.content_language = content_language;
    }

    pub fn set_expires(&mut self, expires: Option<String>) {
        self.expires = expires;
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_content_encoding(mut self, content_encoding: impl Into<String>) -> Self {
        self.content_encoding = Some(content_encoding.into());
        self
    }

    pub fn with_content_disposition(mut self, content_disposition: impl Into<String>) -> Self {
        self.content_disposition = Some(content_disposition.into());
        self
    }

    pub fn with_content_language(mut self, content_language: impl Into<String>) -> Self {
        self.content_language = Some(content_language.into());
        self
    }
}

/// Maps structured content attributes to and from raw header pairs.
pub trait ContentMetadataCodec: Send + Sync {
    fn to_headers(&self, metadata: &ContentMetadata) -> HeaderMap;

    /// Only content headers are consumed; every other header is ignored.
    fn from_headers(&self, metadata: &mut ContentMetadata, headers: &HeaderMap);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StandardContentMetadataCodec;

impl ContentMetadataCodec for StandardContentMetadataCodec {
    fn to_headers(&self, metadata: &ContentMetadata) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(length) = metadata.length {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        }
        let text_fields = [
            (CONTENT_TYPE, metadata.content_type()),
            (CONTENT_ENCODING, metadata.content_encoding()),
            (CONTENT_DISPOSITION, metadata.content_disposition()),
            (CONTENT_LANGUAGE, metadata.content_language()),
            (EXPIRES, metadata.expires()),
        ];
        for (name, value) in text_fields {
            let Some(value) = value else {
                continue;
            };
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.insert(name, value);
                }
                Err(_) => debug!(header = %name, value, "skipping unrepresentable content header"),
            }
        }
        headers
    }

    fn from_headers(&self, metadata: &mut ContentMetadata, headers: &HeaderMap) {
        if let Some(value) = headers.get(CONTENT_LENGTH) {
            let parsed = value
                .to_str()
                .ok()
                .and_then(|text| text.trim().parse::<u64>().ok());
            if parsed.is_none() {
                debug!(value = ?value, "ignoring malformed content-length");
            }
            metadata.length = parsed;
        }
        if let Some(value) = header_text(headers, &CONTENT_TYPE) {
            metadata.content_type = Some(value);
        }
        if let Some(value) = header_text(headers, &CONTENT_ENCODING) {
            metadata.content_encoding = Some(value);
        }
        if let Some(value) = header_text(headers, &CONTENT_DISPOSITION) {
            metadata.content_disposition = Some(value);
        }
        if let Some(value) = header_text(headers, &CONTENT_LANGUAGE) {
            metadata.content_language = Some(value);
        }
        if let Some(value) = header_text(headers, &EXPIRES) {
            metadata.expires = Some(value);
        }
    }
}

fn header_text(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
}

pub fn is_content_header(name: &HeaderName) -> bool {
    CONTENT_HEADERS.contains(name)
}

/// Copy of `headers` without the names the codec owns.
pub fn filter_out_content_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_content_header(name) {
            filtered.append(name.clone(), value.clone());
        }
    }
    filtered
}

#[cfg(test)]
mod tests {
    use http::HeaderMap;
    use http::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, HeaderValue};

    use super::{
        ContentMetadata, ContentMetadataCodec, StandardContentMetadataCodec,
        filter_out_content_headers,
    };

    #[test]
    fn length_and_type_survive_header_round_trip() {
        let codec = StandardContentMetadataCodec;
        let metadata = ContentMetadata::new()
            .with_length(1_024)
            .with_content_type("application/vnd.vmware.vcloud.instantiateVmParams+xml");

        let headers = codec.to_headers(&metadata);
        let mut decoded = ContentMetadata::new();
        codec.from_headers(&mut decoded, &headers);

        assert_eq!(decoded.length(), Some(1_024));
        assert_eq!(
            decoded.content_type(),
            Some("application/vnd.vmware.vcloud.instantiateVmParams+xml")
        );
    }

    #[test]
    fn from_headers_ignores_foreign_headers_and_keeps_unset_fields() {
        let codec = StandardContentMetadataCodec;
        let mut headers = HeaderMap::new();
        headers.insert(ETAG, HeaderValue::from_static("\"abc\""));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        let mut metadata = ContentMetadata::new().with_content_language("en");
        codec.from_headers(&mut metadata, &headers);

        assert_eq!(metadata.content_type(), Some("text/plain"));
        assert_eq!(metadata.content_language(), Some("en"));
        assert_eq!(metadata.length(), None);
    }

    #[test]
    fn malformed_length_is_dropped_without_error() {
        let codec = StandardContentMetadataCodec;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("twelve"));

        let mut metadata = ContentMetadata::new().with_length(3);
        codec.from_headers(&mut metadata, &headers);

        assert_eq!(metadata.length(), None);
    }

    #[test]
    fn filename_is_read_from_disposition() {
        let metadata =
            ContentMetadata::new().with_content_disposition("attachment; filename=\"disk.vmdk\"");
        assert_eq!(metadata.filename(), Some("disk.vmdk"));

        let inline = ContentMetadata::new().with_content_disposition("inline");
        assert_eq!(inline.filename(), None);
    }

    #[test]
    fn content_headers_are_filtered_but_duplicates_of_others_remain() {
        let mut headers = HeaderMap::new();
        headers.append("x-vcloud-authorization", HeaderValue::from_static("a"));
        headers.append("x-vcloud-authorization", HeaderValue::from_static("b"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("2"));

        let filtered = filter_out_content_headers(&headers);

        assert!(!filtered.contains_key(CONTENT_TYPE));
        assert!(!filtered.contains_key(CONTENT_LENGTH));
        let values: Vec<_> = filtered.get_all("x-vcloud-authorization").iter().collect();
        assert_eq!(values, ["a", "b"]);
    }
}
