// Copyright 2025 sturdy developers. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::{self, Result};
use crate::io::MaxSizeAdapter;
use crate::transport::Transport;
use snafu::ResultExt;
use std::io::Read;
use url::Url;

/// Opens a size-capped reader for `url`.
pub(crate) fn fetch_max_size(
    transport: &dyn Transport,
    url: Url,
    max_size: u64,
    specifier: &'static str,
) -> Result<impl Read + Send> {
    let reader = transport.fetch(url).context(error::TransportSnafu)?;
    Ok(MaxSizeAdapter::new(reader, specifier, max_size))
}

/// Fetches `url` into memory, failing if the response exceeds `max_size`
/// bytes.
pub(crate) fn fetch_bytes(
    transport: &dyn Transport,
    url: Url,
    max_size: u64,
    specifier: &'static str,
) -> Result<Vec<u8>> {
    let mut reader = fetch_max_size(transport, url.clone(), max_size, specifier)?;
    let mut data = Vec::new();
    reader
        .read_to_end(&mut data)
        .context(error::FetchReadSnafu { url })?;
    Ok(data)
}
