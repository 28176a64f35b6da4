//! Blob service XML documents.
//!
//! Decoders for the listing and block-list responses the client reads,
//! the `<BlockList>` body it commits, and the response renderers the
//! in-memory backend uses. All of it goes through `quick-xml`.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeMap;
use std::io::Cursor;

use crate::errors::{FsError, FsResult};
use crate::filesystem::ContainerHandle;
use crate::listing::{BlobItem, BlobListPage, Page};

/// One entry of a committed block list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    /// Base64 block identifier.
    pub id: String,
    /// Block size in bytes.
    pub size: u64,
}

/// Which copy of a block a `<BlockList>` entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    /// Most recently uploaded copy, uncommitted first.
    Latest,
    /// The copy in the current committed list.
    Committed,
    /// An uncommitted copy only.
    Uncommitted,
}

/// Parse an HTTP date (`Mon, 24 Feb 2026 12:34:56 GMT`).
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ── Decoding ────────────────────────────────────────────────────────

/// Parse a List Containers `<EnumerationResults>` document.
///
/// ```xml
/// <EnumerationResults ServiceEndpoint="https://acct.blob.core.windows.net/">
///   <Containers>
///     <Container>
///       <Name>photos</Name>
///       <Properties><Last-Modified>...</Last-Modified><Etag>...</Etag></Properties>
///     </Container>
///   </Containers>
///   <NextMarker />
/// </EnumerationResults>
/// ```
pub fn parse_container_list(body: &[u8]) -> FsResult<Page<ContainerHandle>> {
    let mut page = Page::default();
    let mut current: Option<ContainerHandle> = None;

    walk(body, |event, stack| match event {
        Walk::Open("Container") => current = Some(ContainerHandle::default()),
        Walk::Close("Container") => {
            if let Some(container) = current.take() {
                page.items.push(container);
            }
        }
        Walk::Text(text) => {
            if let Some(container) = current.as_mut() {
                if ends_with(stack, &["Container", "Name"]) {
                    container.name = text;
                } else if ends_with(stack, &["Container", "Properties", "*"]) {
                    let key = stack[stack.len() - 1].clone();
                    container.properties.insert(key, text);
                }
            } else if ends_with(stack, &["EnumerationResults", "NextMarker"]) {
                page.next_marker = text;
            }
        }
        _ => {}
    })?;

    Ok(page)
}

/// Parse a List Blobs `<EnumerationResults>` document.
///
/// Blob entries and `<BlobPrefix>` entries are returned separately.
pub fn parse_blob_list(body: &[u8]) -> FsResult<BlobListPage> {
    let mut page = BlobListPage::default();
    let mut current: Option<BlobItem> = None;

    walk(body, |event, stack| match event {
        Walk::Open("Blob") => current = Some(BlobItem::default()),
        Walk::Close("Blob") => {
            if let Some(blob) = current.take() {
                page.blobs.push(blob);
            }
        }
        Walk::Text(text) => {
            if let Some(blob) = current.as_mut() {
                if ends_with(stack, &["Blob", "Name"]) {
                    blob.name = text;
                } else if ends_with(stack, &["Properties", "Content-Length"]) {
                    blob.size = text.parse().unwrap_or(0);
                } else if ends_with(stack, &["Properties", "Last-Modified"]) {
                    blob.last_modified = parse_http_date(&text);
                } else if ends_with(stack, &["Properties", "BlobType"]) {
                    blob.blob_type = text;
                }
            } else if ends_with(stack, &["BlobPrefix", "Name"]) {
                page.prefixes.push(text);
            } else if ends_with(stack, &["EnumerationResults", "NextMarker"]) {
                page.next_marker = text;
            }
        }
        _ => {}
    })?;

    Ok(page)
}

/// Parse the committed section of a Get Block List response.
///
/// ```xml
/// <BlockList>
///   <CommittedBlocks>
///     <Block><Name>base64-id</Name><Size>4000000</Size></Block>
///   </CommittedBlocks>
///   <UncommittedBlocks />
/// </BlockList>
/// ```
pub fn parse_committed_blocks(body: &[u8]) -> FsResult<Vec<BlockEntry>> {
    let mut blocks = Vec::new();
    let mut current: Option<BlockEntry> = None;
    let mut in_committed = false;

    walk(body, |event, stack| match event {
        Walk::Open("CommittedBlocks") => in_committed = true,
        Walk::Close("CommittedBlocks") => in_committed = false,
        Walk::Open("Block") if in_committed => {
            current = Some(BlockEntry {
                id: String::new(),
                size: 0,
            })
        }
        Walk::Close("Block") => {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
        }
        Walk::Text(text) => {
            if let Some(block) = current.as_mut() {
                if ends_with(stack, &["Block", "Name"]) {
                    block.id = text;
                } else if ends_with(stack, &["Block", "Size"]) {
                    block.size = text.parse().unwrap_or(0);
                }
            }
        }
        _ => {}
    })?;

    if blocks.iter().any(|b| b.id.is_empty()) {
        return Err(FsError::malformed("block list entry without a name"));
    }
    Ok(blocks)
}

/// Parse a Put Block List request body into `(reference, id)` pairs, in
/// document order.
pub fn parse_block_list_request(body: &[u8]) -> FsResult<Vec<(BlockRef, String)>> {
    let mut entries = Vec::new();
    walk(body, |event, stack| {
        if let Walk::Text(text) = event {
            let kind = match stack.last().map(String::as_str) {
                Some("Latest") => BlockRef::Latest,
                Some("Committed") => BlockRef::Committed,
                Some("Uncommitted") => BlockRef::Uncommitted,
                _ => return,
            };
            entries.push((kind, text));
        }
    })?;
    Ok(entries)
}

// ── Encoding ────────────────────────────────────────────────────────

/// Render a Put Block List body where every entry is `<Latest>`.
pub fn render_block_list(block_ids: &[String]) -> String {
    let mut writer = new_document();
    writer
        .write_event(Event::Start(BytesStart::new("BlockList")))
        .expect("start BlockList");
    for id in block_ids {
        write_text_element(&mut writer, "Latest", id);
    }
    writer
        .write_event(Event::End(BytesEnd::new("BlockList")))
        .expect("end BlockList");
    finish(writer)
}

/// Render a Get Block List response holding only committed blocks.
pub fn render_committed_block_list(blocks: &[BlockEntry]) -> String {
    let mut writer = new_document();
    writer
        .write_event(Event::Start(BytesStart::new("BlockList")))
        .expect("start BlockList");
    writer
        .write_event(Event::Start(BytesStart::new("CommittedBlocks")))
        .expect("start CommittedBlocks");
    for block in blocks {
        let size = block.size.to_string();
        write_simple_element_group(
            &mut writer,
            "Block",
            &[("Name", block.id.as_str()), ("Size", size.as_str())],
        );
    }
    writer
        .write_event(Event::End(BytesEnd::new("CommittedBlocks")))
        .expect("end CommittedBlocks");
    writer
        .write_event(Event::Empty(BytesStart::new("UncommittedBlocks")))
        .expect("UncommittedBlocks");
    writer
        .write_event(Event::End(BytesEnd::new("BlockList")))
        .expect("end BlockList");
    finish(writer)
}

/// Render a List Containers response.
pub fn render_container_list(
    service_endpoint: &str,
    containers: &[ContainerHandle],
    next_marker: &str,
) -> String {
    let mut writer = new_document();
    let root = BytesStart::new("EnumerationResults")
        .with_attributes([("ServiceEndpoint", service_endpoint)]);
    writer.write_event(Event::Start(root)).expect("start root");

    writer
        .write_event(Event::Start(BytesStart::new("Containers")))
        .expect("start Containers");
    for container in containers {
        writer
            .write_event(Event::Start(BytesStart::new("Container")))
            .expect("start Container");
        write_text_element(&mut writer, "Name", &container.name);
        let props: Vec<(&str, &str)> = container
            .properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        write_simple_element_group(&mut writer, "Properties", &props);
        writer
            .write_event(Event::End(BytesEnd::new("Container")))
            .expect("end Container");
    }
    writer
        .write_event(Event::End(BytesEnd::new("Containers")))
        .expect("end Containers");

    write_text_element(&mut writer, "NextMarker", next_marker);
    writer
        .write_event(Event::End(BytesEnd::new("EnumerationResults")))
        .expect("end root");
    finish(writer)
}

/// One entry of a rendered blob listing.
#[derive(Debug, Clone)]
pub enum BlobListEntry<'a> {
    Blob(&'a BlobItem),
    Prefix(&'a str),
}

/// Render a List Blobs response.
pub fn render_blob_list(
    service_endpoint: &str,
    container: &str,
    prefix: &str,
    delimiter: &str,
    entries: &[BlobListEntry<'_>],
    next_marker: &str,
) -> String {
    let mut writer = new_document();
    let root = BytesStart::new("EnumerationResults").with_attributes([
        ("ServiceEndpoint", service_endpoint),
        ("ContainerName", container),
    ]);
    writer.write_event(Event::Start(root)).expect("start root");

    write_text_element(&mut writer, "Prefix", prefix);
    if !delimiter.is_empty() {
        write_text_element(&mut writer, "Delimiter", delimiter);
    }

    writer
        .write_event(Event::Start(BytesStart::new("Blobs")))
        .expect("start Blobs");
    for entry in entries {
        match entry {
            BlobListEntry::Blob(blob) => {
                writer
                    .write_event(Event::Start(BytesStart::new("Blob")))
                    .expect("start Blob");
                write_text_element(&mut writer, "Name", &blob.name);
                let last_modified = blob
                    .last_modified
                    .map(|dt| dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
                    .unwrap_or_default();
                let size = blob.size.to_string();
                write_simple_element_group(
                    &mut writer,
                    "Properties",
                    &[
                        ("Last-Modified", last_modified.as_str()),
                        ("Content-Length", size.as_str()),
                        ("BlobType", blob.blob_type.as_str()),
                    ],
                );
                writer
                    .write_event(Event::End(BytesEnd::new("Blob")))
                    .expect("end Blob");
            }
            BlobListEntry::Prefix(name) => {
                write_simple_element_group(&mut writer, "BlobPrefix", &[("Name", *name)]);
            }
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new("Blobs")))
        .expect("end Blobs");

    write_text_element(&mut writer, "NextMarker", next_marker);
    writer
        .write_event(Event::End(BytesEnd::new("EnumerationResults")))
        .expect("end root");
    finish(writer)
}

// ── Helpers ─────────────────────────────────────────────────────────

enum Walk<'a> {
    Open(&'a str),
    Close(&'a str),
    Text(String),
}

/// Drive a pull parser over `body`, keeping the stack of open element
/// names and handing each open/close/text event to `visit`. Text is only
/// reported for leaf elements, untrimmed, just before their close.
/// Self-closing elements produce nothing.
fn walk<F>(body: &[u8], mut visit: F) -> FsResult<()>
where
    F: FnMut(Walk<'_>, &[String]),
{
    let mut reader = Reader::from_reader(body);

    let mut stack: Vec<String> = Vec::new();
    let mut buf = Vec::new();
    let mut text = String::new();
    let mut leaf = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                stack.push(name);
                let name = stack[stack.len() - 1].clone();
                visit(Walk::Open(&name), &stack);
                text.clear();
                leaf = true;
            }
            Event::Empty(_) => leaf = false,
            Event::End(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if stack.last() != Some(&name) {
                    return Err(FsError::malformed(format!("unbalanced element </{name}>")));
                }
                if leaf {
                    visit(Walk::Text(std::mem::take(&mut text)), &stack);
                }
                stack.pop();
                visit(Walk::Close(&name), &stack);
                text.clear();
                leaf = false;
            }
            Event::Text(ref e) => text.push_str(&e.unescape()?),
            Event::CData(ref e) => {
                text.push_str(&String::from_utf8_lossy(&e.clone().into_inner()))
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(FsError::malformed("document ended inside an element"));
    }
    Ok(())
}

/// Whether the innermost open elements match `suffix`; `*` matches any name.
fn ends_with(stack: &[String], suffix: &[&str]) -> bool {
    stack.len() >= suffix.len()
        && stack[stack.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(have, want)| *want == "*" || have == want)
}

fn new_document() -> Writer<Cursor<Vec<u8>>> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .expect("xml decl");
    writer
}

fn finish(writer: Writer<Cursor<Vec<u8>>>) -> String {
    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

/// Write a `<tag>text</tag>` element.
fn write_text_element(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str, text: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .expect("start tag");
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .expect("text");
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .expect("end tag");
}

/// Write a parent element containing a flat list of child text elements.
fn write_simple_element_group(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    parent: &str,
    children: &[(&str, &str)],
) {
    writer
        .write_event(Event::Start(BytesStart::new(parent)))
        .expect("start parent");
    for (tag, value) in children {
        write_text_element(writer, tag, value);
    }
    writer
        .write_event(Event::End(BytesEnd::new(parent)))
        .expect("end parent");
}

/// Collect `<Properties>` children into a map.
pub fn properties_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
