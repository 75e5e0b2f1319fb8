use url::Url;

pub const PROXY_PREFIX: &str = "/api/images/";

#[derive(Debug, thiserror::Error)]
#[error("invalid image url {url:?}: {source}")]
pub struct ParseError {
    pub url: String,
    #[source]
    pub source: url::ParseError,
}

/// Rewrites a bucket URL (`https://host/<bucket>/<key…>`) to the site's image
/// proxy route. Anything unparsable is handed back untouched.
pub fn proxy_image_url(original: &str) -> String {
    match try_proxy_image_url(original) {
        Ok(proxied) => proxied,
        Err(err) => {
            log::warn!("images: {err}");
            original.to_string()
        }
    }
}

pub fn try_proxy_image_url(original: &str) -> Result<String, ParseError> {
    let url = Url::parse(original).map_err(|source| ParseError {
        url: original.to_string(),
        source,
    })?;
    let segments: Vec<&str> = url
        .path()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .skip(1)
        .collect();
    Ok(format!("{PROXY_PREFIX}{}", segments.join("/")))
}

/// Absolute form of a proxied URL, for handing to a browser.
pub fn absolute_proxy_url(base: &Url, original: &str) -> String {
    let proxied = proxy_image_url(original);
    if !proxied.starts_with('/') {
        return proxied;
    }
    base.join(proxied.trim_start_matches('/'))
        .map(|url| url.to_string())
        .unwrap_or(proxied)
}

/// Decodes the JSON string array stored alongside a kudos record.
pub fn parse_image_list(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(urls) => urls,
        Err(err) => {
            log::warn!("images: malformed image list {raw:?}: {err}");
            Vec::new()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Carousel {
    index: usize,
    len: usize,
    expanded: bool,
}

impl Carousel {
    pub fn new(len: usize) -> Self {
        Self {
            index: 0,
            len,
            expanded: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn next(&mut self) {
        if self.len > 0 {
            self.index = (self.index + 1) % self.len;
        }
    }

    pub fn prev(&mut self) {
        if self.len > 0 {
            self.index = (self.index + self.len - 1) % self.len;
        }
    }

    pub fn select(&mut self, index: usize) {
        if index < self.len {
            self.index = index;
        }
    }

    pub fn toggle_expanded(&mut self) {
        self.expanded = !self.expanded;
    }

    /// `"2/5"`; empty for a single image, which has no navigation.
    pub fn counter(&self) -> String {
        if self.len > 1 {
            format!("{}/{}", self.index + 1, self.len)
        } else {
            String::new()
        }
    }
}
