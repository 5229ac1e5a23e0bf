use std::collections::HashMap;
use std::fmt;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use native_tls::TlsConnector;
use thiserror::Error;

use crate::cookies::CookieJar;

#[derive(Debug, Error, PartialEq)]
pub enum UrlError {
    #[error("missing scheme separator in {0:?}")]
    MissingScheme(String),
    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),
    #[error("invalid port in {0:?}")]
    InvalidPort(String),
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
    #[error("certificate error: {0}")]
    Certificate(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("refusing {0} response")]
    UnsupportedEncoding(String),
    #[error(transparent)]
    Url(#[from] UrlError),
}

/// An absolute `http`/`https` URL. The origin (`scheme://host:port`) is the
/// key for the cookie jar and for same-origin comparisons.
#[derive(Clone, Debug, PartialEq)]
pub struct Url {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Url {
    pub fn parse(url: &str) -> Result<Url, UrlError> {
        // Extract the scheme, which is separated from the rest by ://.
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| UrlError::MissingScheme(url.to_string()))?;
        if scheme != "http" && scheme != "https" {
            return Err(UrlError::UnsupportedScheme(scheme.to_string()));
        }

        let (host_port, path) = match rest.split_once('/') {
            Some((hp, p)) => (hp, format!("/{}", p)),
            None => (rest, "/".to_string()),
        };

        let (host, port) = match host_port.split_once(':') {
            Some((h, p)) => {
                let port = p.parse().map_err(|_| UrlError::InvalidPort(url.to_string()))?;
                (h.to_string(), port)
            }
            None => {
                let port = if scheme == "http" { 80 } else { 443 };
                (host_port.to_string(), port)
            }
        };

        Ok(Url { scheme: scheme.to_string(), host, port, path })
    }

    /// `scheme://host:port`, with the port always present.
    pub fn origin(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// Resolves a possibly-relative URL against this one.
    pub fn resolve(&self, url: &str) -> Result<Url, UrlError> {
        if url.contains("://") {
            return Url::parse(url);
        }
        let mut url = url.to_string();
        if !url.starts_with('/') {
            // Relative to the directory of the current path.
            let mut dir = match self.path.rsplit_once('/') {
                Some((d, _)) => d.to_string(),
                None => String::new(),
            };
            while let Some(rest) = url.strip_prefix("../") {
                url = rest.to_string();
                if let Some((parent, _)) = dir.rsplit_once('/') {
                    dir = parent.to_string();
                }
            }
            url = format!("{}/{}", dir, url);
        }
        if let Some(rest) = url.strip_prefix("//") {
            Url::parse(&format!("{}://{}", self.scheme, rest))
        } else {
            Url::parse(&format!("{}://{}:{}{}", self.scheme, self.host, self.port, url))
        }
    }

    fn default_port(&self) -> u16 {
        if self.scheme == "http" { 80 } else { 443 }
    }

    /// Issues a blocking HTTP/1.0 request for this URL and stores any
    /// `Set-Cookie` response headers into the jar.
    pub fn request(&self, options: &RequestOptions) -> Result<HttpResponse, RequestError> {
        let method = if options.payload.is_some() { "POST" } else { "GET" };
        let origin = self.origin();

        let mut request = format!("{} {} HTTP/1.0\r\n", method, self.path);
        request.push_str(&format!("Host: {}\r\n", self.host));
        if let Some(referrer) = &options.referrer {
            request.push_str(&format!("Referer: {}\r\n", referrer));
        }
        if let Some(initiator) = &options.initiator {
            request.push_str(&format!("Origin: {}\r\n", initiator));
        }
        if let Some(jar) = &options.jar {
            let header = jar
                .lock()
                .expect("cookie jar poisoned")
                .request_header(&origin, method, options.initiator.as_deref());
            if let Some(header) = header {
                request.push_str(&format!("Cookie: {}\r\n", header));
            }
        }
        if let Some(payload) = options.payload.as_deref() {
            request.push_str("Content-Type: application/x-www-form-urlencoded\r\n");
            request.push_str(&format!("Content-Length: {}\r\n", payload.len()));
        }
        request.push_str("\r\n");
        if let Some(payload) = options.payload.as_deref() {
            request.push_str(payload);
        }

        tracing::debug!(url = %self, method, "issuing request");

        let tcp = TcpStream::connect((self.host.as_str(), self.port))?;
        let mut stream = if self.scheme == "https" {
            let connector =
                TlsConnector::new().map_err(|e| RequestError::Certificate(e.to_string()))?;
            let tls = connector
                .connect(&self.host, tcp)
                .map_err(|e| RequestError::Certificate(e.to_string()))?;
            Stream::Tls(Box::new(tls))
        } else {
            Stream::Plain(tcp)
        };
        stream.write_all(request.as_bytes())?;
        stream.flush()?;

        let response = HttpResponse::read(&mut BufReader::new(stream))?;
        if let Some(jar) = &options.jar {
            let mut jar = jar.lock().expect("cookie jar poisoned");
            for line in &response.set_cookies {
                jar.set_from_header(&origin, line);
            }
        }
        Ok(response)
    }
}

impl fmt::Display for Url {
    /// Formats the URL, omitting the port when it is the scheme default.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.port == self.default_port() {
            write!(f, "{}://{}{}", self.scheme, self.host, self.path)
        } else {
            write!(f, "{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
        }
    }
}

/// Everything a request carries besides the URL itself. The referrer has
/// already been filtered through the page's referrer policy by the caller;
/// `initiator` is the origin used for the `Origin` header and for SameSite
/// cookie decisions.
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub referrer: Option<Url>,
    pub initiator: Option<String>,
    pub payload: Option<String>,
    pub jar: Option<Arc<Mutex<CookieJar>>>,
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<native_tls::TlsStream<TcpStream>>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.write(buf),
            Stream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Plain(s) => s.flush(),
            Stream::Tls(s) => s.flush(),
        }
    }
}

/// A parsed HTTP/1.0 response. Header names are lowercased; `Set-Cookie` is
/// collected separately because it may repeat.
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: HashMap<String, String>,
    pub set_cookies: Vec<String>,
    pub body: String,
}

impl HttpResponse {
    fn read(reader: &mut impl BufRead) -> Result<HttpResponse, RequestError> {
        let mut status_line = String::new();
        reader.read_line(&mut status_line)?;
        let mut parts = status_line.trim_end().splitn(3, ' ');
        let _version = parts
            .next()
            .ok_or_else(|| RequestError::MalformedResponse(status_line.clone()))?;
        let status = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| RequestError::MalformedResponse(status_line.clone()))?;
        let reason = parts.next().unwrap_or("").to_string();

        let mut headers = HashMap::new();
        let mut set_cookies = Vec::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            let Some((name, value)) = line.split_once(':') else {
                return Err(RequestError::MalformedResponse(line.to_string()));
            };
            let name = name.to_ascii_lowercase();
            let value = value.trim().to_string();
            if name == "set-cookie" {
                set_cookies.push(value);
            } else {
                headers.insert(name, value);
            }
        }

        // No support for chunked or compressed bodies.
        for rejected in ["transfer-encoding", "content-encoding"] {
            if headers.contains_key(rejected) {
                return Err(RequestError::UnsupportedEncoding(rejected.to_string()));
            }
        }

        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        Ok(HttpResponse {
            status,
            reason,
            headers,
            set_cookies,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}
