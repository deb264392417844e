#![warn(clippy::nursery, clippy::pedantic)]
#![deny(unsafe_code)]

// Pastebin Lite CLI Client
// Copyright (C) 2021  Edward Shen
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use atty::Stream;
use clap::Parser;
use pastebin_lite_common::{
    api_url, create_url, CreatePasteRequest, CreatePasteResponse, PasteUrl, PasteView, Url,
};
use reqwest::blocking::Client;
use reqwest::StatusCode;

#[derive(Parser)]
struct Opts {
    #[clap(subcommand)]
    action: Action,
}

#[derive(Parser)]
enum Action {
    /// Create a paste and print its link.
    Create {
        /// The Pastebin Lite instance to create the paste on.
        url: Url,
        /// Seconds until the paste expires.
        #[clap(short, long)]
        ttl: Option<u64>,
        /// How many times the paste may be read before it disappears.
        #[clap(short, long)]
        max_views: Option<u32>,
        /// File to upload. Reads stdin when omitted.
        path: Option<PathBuf>,
    },
    /// Read a paste. This spends one of its views.
    Read {
        /// The paste link, as printed by `create`.
        url: PasteUrl,
    },
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    match opts.action {
        Action::Create {
            url,
            ttl,
            max_views,
            path,
        } => handle_create(url, ttl, max_views, path),
        Action::Read { url } => handle_read(&url),
    }?;

    Ok(())
}

fn build_request(
    content: String,
    ttl: Option<u64>,
    max_views: Option<u32>,
) -> Result<CreatePasteRequest> {
    if content.trim().is_empty() {
        bail!("Refusing to create an empty paste.");
    }

    let ttl_seconds = ttl
        .map(i64::try_from)
        .transpose()
        .context("ttl is too large")?;

    Ok(CreatePasteRequest {
        content,
        ttl_seconds,
        max_views: max_views.map(i64::from),
    })
}

fn read_content(path: Option<PathBuf>) -> Result<String> {
    if let Some(path) = path {
        return std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()));
    }

    if atty::is(Stream::Stdin) {
        bail!("No input. Pass a file or pipe content in.");
    }

    let mut content = String::new();
    std::io::stdin()
        .read_to_string(&mut content)
        .context("Failed to read stdin")?;
    Ok(content)
}

fn handle_create(
    url: Url,
    ttl: Option<u64>,
    max_views: Option<u32>,
    path: Option<PathBuf>,
) -> Result<()> {
    let request = build_request(read_content(path)?, ttl, max_views)?;
    let endpoint = create_url(&url).context("Failed to get base URL")?;

    let res = Client::new()
        .post(endpoint)
        .json(&request)
        .send()
        .context("Request to server failed")?;

    if res.status() != StatusCode::CREATED {
        bail!("Upload failed. Got HTTP error {}", res.status());
    }

    let created: CreatePasteResponse = res.json().context("Malformed server response")?;
    println!("{}", created.url);

    Ok(())
}

fn handle_read(url: &PasteUrl) -> Result<()> {
    let endpoint = api_url(&url.base, &url.id)?;
    let res = Client::new()
        .get(endpoint)
        .send()
        .context("Failed to get data")?;

    match res.status() {
        StatusCode::OK => (),
        StatusCode::NOT_FOUND => bail!("Paste not found or expired."),
        status => bail!("Got bad response from server: {}", status),
    }

    let view: PasteView = res.json().context("Malformed server response")?;
    std::io::stdout().write_all(view.content.as_bytes())?;
    eprintln!("{}", view);

    Ok(())
}
