//! HTTP endpoint B: the legacy content list/fetch service.
//!
//! One POST route speaking the PLAIN UrlForm dialect (no value
//! obfuscation on this host). `action=list` answers with tab-separated
//! plaintext lines; `action=contents` answers with the raw file bytes,
//! guaranteed to end in the 2-byte checksum trailer the client verifies.
//! The legacy client treats any non-200 as fatal, so unknown requests get
//! an empty 200 body instead of an error status.

use std::sync::Arc;

use bytes::Bytes;
use crc::{Crc, CRC_16_IBM_3740};
use dreamlink_protocol::UrlForm;
use dreamlink_session::RecordStore;
use warp::filters::BoxedFilter;
use warp::http::Response;
use warp::Filter;

use crate::server::{ContentFile, ServerState};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// The POST /download route.
pub(crate) fn route<S: RecordStore>(
    state: Arc<ServerState<S>>,
) -> BoxedFilter<(Response<Vec<u8>>,)> {
    let with_state = warp::any().map(move || Arc::clone(&state));
    warp::post()
        .and(warp::path("download"))
        .and(warp::path::end())
        .and(warp::body::bytes())
        .and(with_state)
        .then(handle)
        .boxed()
}

async fn handle<S: RecordStore>(
    body: Bytes,
    state: Arc<ServerState<S>>,
) -> Response<Vec<u8>> {
    let fields = match std::str::from_utf8(&body).map(|text| UrlForm::plain().decode(text))
    {
        Ok(Ok(fields)) => fields,
        _ => return plain_response(Vec::new()),
    };
    let find = |name: &str| {
        fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    };

    match find("action") {
        Some("list") => plain_response(list(&state.config.content_files).into_bytes()),
        Some("contents") => {
            let bytes = find("name")
                .and_then(|name| {
                    state
                        .config
                        .content_files
                        .iter()
                        .find(|file| file.name == name)
                })
                .map(|file| with_trailer(&file.bytes))
                .unwrap_or_default();
            plain_response(bytes)
        }
        _ => plain_response(Vec::new()),
    }
}

/// One line per file: `name\t\ttype\tindex\t\tsize`, where size counts
/// the bytes as served (trailer included).
fn list(files: &[ContentFile]) -> String {
    files
        .iter()
        .map(|file| {
            format!(
                "{}\t\t{}\t{}\t\t{}",
                file.name,
                file.file_type,
                file.index,
                with_trailer(&file.bytes).len()
            )
        })
        .collect::<Vec<_>>()
        .join("\r\n")
}

/// Returns the file bytes ending in their big-endian CRC-16 trailer,
/// appending one iff the stored bytes do not already embed it.
fn with_trailer(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() >= 2 {
        let (data, tail) = bytes.split_at(bytes.len() - 2);
        if CRC16.checksum(data).to_be_bytes() == tail {
            return bytes.to_vec();
        }
    }
    let mut out = bytes.to_vec();
    out.extend_from_slice(&CRC16.checksum(bytes).to_be_bytes());
    out
}

fn plain_response(body: Vec<u8>) -> Response<Vec<u8>> {
    Response::builder()
        .header("content-type", "text/plain")
        .body(body)
        .unwrap_or_default()
}
