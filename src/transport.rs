//! Request transport decoding.
//!
//! A request arrives either as command-line arguments (`Name=Value` pairs,
//! taken verbatim) or as CGI input (`QUERY_STRING` for GET, a urlencoded
//! body for POST). The CGI path is the interactive transport: only there do
//! responses carry HTTP-style headers.

use crate::error::{PixError, Result};
use crate::params::Params;
use tokio::io::AsyncReadExt;
use url::form_urlencoded;

/// A decoded request plus the interactive-vs-direct invocation signal.
#[derive(Debug)]
pub struct Transport {
    pub params: Params,
    pub interactive: bool,
}

/// Decode the request from argv pairs or, failing that, from CGI input.
pub async fn decode(cli_params: &[String]) -> Result<Transport> {
    if let Some(params) = from_cli(cli_params) {
        return Ok(Transport {
            params,
            interactive: false,
        });
    }
    if let Some(params) = from_cgi().await? {
        return Ok(Transport {
            params,
            interactive: true,
        });
    }
    Err(PixError::Malformed(
        "no request parameters were supplied".to_string(),
    ))
}

/// Parse ordered `Name=Value` argument pairs. Arguments without `=` are
/// ignored; an empty argument list means the CLI transport is not in use.
pub fn from_cli(args: &[String]) -> Option<Params> {
    let pairs: Vec<(String, String)> = args
        .iter()
        .filter_map(|arg| {
            arg.split_once('=')
                .map(|(name, value)| (name.to_string(), value.to_string()))
        })
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(Params::new(pairs))
    }
}

/// Decode CGI input when the environment says a gateway invoked us.
async fn from_cgi() -> Result<Option<Params>> {
    let Ok(method) = std::env::var("REQUEST_METHOD") else {
        return Ok(None);
    };
    let encoded = match method.as_str() {
        "POST" => {
            let length: usize = std::env::var("CONTENT_LENGTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let mut body = vec![0u8; length];
            if length > 0 {
                tokio::io::stdin()
                    .read_exact(&mut body)
                    .await
                    .map_err(|e| PixError::Malformed(format!("short request body: {}", e)))?;
            }
            body
        }
        _ => std::env::var("QUERY_STRING").unwrap_or_default().into_bytes(),
    };
    Ok(Some(decode_form(&encoded)))
}

/// Parse a urlencoded parameter string, preserving order.
pub fn decode_form(encoded: &[u8]) -> Params {
    Params::new(
        form_urlencoded::parse(encoded)
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect(),
    )
}
