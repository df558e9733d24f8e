// Copyright (c) 2023 Huawei Device Co., Ltd.
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Header list assembly and validation rules.
//!
//! Requests: pseudo-headers are synthesized from the request target with
//! caller-supplied pseudo-headers preserved in order right after
//! `:method` and `:authority`; regular names are lowercased; repeated
//! `cookie` headers are joined into one field so HPACK indexes the pair
//! well. For `CONNECT`, `:scheme` and `:path` are omitted unless the
//! caller provides them, which is how extended CONNECT (RFC 8441) with
//! `:protocol` is expressed.
//!
//! Trailers: names are lowercased and checked against the set of headers
//! that must not appear in a trailing block.
//!
//! Responses: the `:status` pseudo-header is extracted, pseudo-headers
//! are stripped from the delivered list, and repeated `cookie` values
//! are concatenated in order of appearance.

use crate::error::Http2Error;

/// Header names that must not appear in trailing header blocks, on top
/// of the blanket pseudo-header ban.
const DISALLOWED_TRAILERS: [&str; 12] = [
    "connection",
    "content-encoding",
    "content-length",
    "content-range",
    "content-type",
    "host",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Whether a header name is a pseudo-header.
pub(crate) fn is_pseudo(name: &str) -> bool {
    name.starts_with(':')
}

/// The accounted size of a header list: name plus value plus the 32-byte
/// per-entry overhead of RFC 9113 section 6.5.2.
pub(crate) fn header_list_size(fields: &[(String, String)]) -> u32 {
    fields
        .iter()
        .map(|(name, value)| name.len() as u32 + value.len() as u32 + 32)
        .sum()
}

/// Builds the full request field list in emission order.
pub(crate) fn build_request_fields(
    method: &str,
    scheme: &str,
    authority: &str,
    path: &str,
    headers: &[(String, String)],
) -> Vec<(String, String)> {
    let mut fields = vec![
        (String::from(":method"), method.to_string()),
        (String::from(":authority"), authority.to_string()),
    ];

    let mut user_scheme = false;
    let mut user_path = false;
    for (name, value) in headers {
        if is_pseudo(name) {
            user_scheme |= name == ":scheme";
            user_path |= name == ":path";
            fields.push((name.clone(), value.clone()));
        }
    }

    // A plain CONNECT carries neither :scheme nor :path; extended
    // CONNECT passes them explicitly along with :protocol.
    if method != "CONNECT" {
        if !user_scheme {
            fields.push((String::from(":scheme"), scheme.to_string()));
        }
        if !user_path {
            fields.push((String::from(":path"), path.to_string()));
        }
    }

    let mut cookie_slot: Option<usize> = None;
    for (name, value) in headers {
        if is_pseudo(name) {
            continue;
        }
        let name = name.to_ascii_lowercase();
        if name == "cookie" {
            match cookie_slot {
                Some(at) => {
                    let joined = &mut fields[at].1;
                    joined.push_str("; ");
                    joined.push_str(value);
                }
                None => {
                    cookie_slot = Some(fields.len());
                    fields.push((name, value.clone()));
                }
            }
        } else {
            fields.push((name, value.clone()));
        }
    }
    fields
}

/// The `:authority` value for a request target: the port is elided when
/// it is the scheme's default.
pub(crate) fn request_authority(scheme: &str, host: &str, port: u16) -> String {
    let default_port = match scheme {
        "https" => 443,
        _ => 80,
    };
    if port == default_port {
        host.to_string()
    } else {
        format!("{host}:{port}")
    }
}

/// Lowercases and validates a trailing header list.
pub(crate) fn validate_trailers(
    trailers: &[(String, String)],
) -> Result<Vec<(String, String)>, Http2Error> {
    let mut validated = Vec::with_capacity(trailers.len());
    for (name, value) in trailers {
        let lowered = name.to_ascii_lowercase();
        if is_pseudo(&lowered) || DISALLOWED_TRAILERS.contains(&lowered.as_str()) {
            return Err(Http2Error::UnallowedTrailingHeader {
                name: name.clone(),
                value: value.clone(),
            });
        }
        validated.push((lowered, value.clone()));
    }
    Ok(validated)
}

/// A decoded response block split into its status and deliverable
/// headers.
pub(crate) struct ResponseFields {
    /// The parsed `:status`, absent when the block carried none.
    pub(crate) status: Option<u16>,
    /// Headers in server order, pseudo-headers stripped and `cookie`
    /// values concatenated in order of appearance.
    pub(crate) headers: Vec<(String, String)>,
}

/// Post-processes a decoded response header block for delivery.
pub(crate) fn split_response_fields(fields: Vec<(String, String)>) -> ResponseFields {
    let mut status = None;
    let mut headers: Vec<(String, String)> = Vec::with_capacity(fields.len());
    let mut cookie_slot: Option<usize> = None;

    for (name, value) in fields {
        if is_pseudo(&name) {
            if status.is_none() && name == ":status" {
                status = value.parse::<u16>().ok();
            }
            continue;
        }
        if name == "cookie" {
            match cookie_slot {
                Some(at) => {
                    let joined = &mut headers[at].1;
                    joined.push_str("; ");
                    joined.push_str(&value);
                }
                None => {
                    cookie_slot = Some(headers.len());
                    headers.push((name, value));
                }
            }
        } else {
            headers.push((name, value));
        }
    }
    ResponseFields { status, headers }
}
