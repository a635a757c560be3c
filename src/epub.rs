//! Zip-backed EPUB adapter for the [`RenderingEngine`] contract.
//!
//! It reads the container, package document, and navigation document, keeps the
//! spine documents in memory, and tracks a "displayed" spine position. Nothing is
//! paginated or laid out; CFIs are generated at spine-item granularity.

use std::io::{Cursor, Read as _};
use std::path::Path;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context as _;
use async_trait::async_trait;
use quick_xml::events::{BytesRef, Event};

use crate::engine::{BookMetadata, Location, RenderingEngine, SpineSection, TocItem};
use crate::extract::collect_paragraphs;
use crate::reference::{fragment, is_cfi, strip_fragment};

const CONTAINER_PATH: &str = "META-INF/container.xml";
const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";
const NOT_DISPLAYED: usize = usize::MAX;

#[derive(Debug)]
struct SpineDocument {
    /// Relative to the package document's directory.
    href: String,
    idref: String,
    markup: String,
}

#[derive(Debug, Default)]
struct ManifestItem {
    id: String,
    href: String,
    media_type: String,
    properties: String,
}

#[derive(Debug)]
pub struct EpubBook {
    metadata: BookMetadata,
    toc: Vec<TocItem>,
    spine: Vec<SpineDocument>,
    current: AtomicUsize,
    /// Character offset at which each spine document starts, plus the total.
    locations: OnceLock<Vec<usize>>,
}

impl EpubBook {
    pub async fn open(path: &Path) -> anyhow::Result<(Self, Vec<u8>)> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("read epub: {}", path.display()))?;
        let book = Self::from_bytes(&bytes)
            .with_context(|| format!("parse epub: {}", path.display()))?;
        Ok((book, bytes))
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let mut archive =
            zip::ZipArchive::new(Cursor::new(bytes)).context("open epub zip archive")?;

        let container = read_entry(&mut archive, CONTAINER_PATH)?;
        let opf_path = parse_rootfile(&container)
            .ok_or_else(|| anyhow::anyhow!("container.xml has no rootfile"))?;
        let opf_dir = parent_dir(&opf_path).to_owned();

        let opf = read_entry(&mut archive, &opf_path)?;
        let package = parse_package(&opf);

        let mut spine = Vec::with_capacity(package.spine.len());
        for idref in &package.spine {
            let Some(item) = package.manifest.iter().find(|item| &item.id == idref) else {
                tracing::warn!(idref = %idref, "spine item missing from manifest");
                continue;
            };
            let zip_path = join_path(&opf_dir, &item.href);
            let markup = read_entry(&mut archive, &zip_path)?;
            spine.push(SpineDocument {
                href: relative_to(&opf_dir, &zip_path),
                idref: idref.clone(),
                markup,
            });
        }
        if spine.is_empty() {
            anyhow::bail!("epub spine is empty");
        }

        let toc = match package.nav_item() {
            Some((item, is_ncx)) => {
                let nav_path = join_path(&opf_dir, &item.href);
                let nav_dir = parent_dir(&nav_path).to_owned();
                let source = read_entry(&mut archive, &nav_path)?;
                let items = if is_ncx {
                    parse_ncx(&source)
                } else {
                    parse_nav(&source)
                };
                rebase_toc(items, &nav_dir, &opf_dir)
            }
            None => {
                tracing::debug!("epub has no navigation document");
                Vec::new()
            }
        };

        Ok(Self {
            metadata: package.metadata,
            toc,
            spine,
            current: AtomicUsize::new(NOT_DISPLAYED),
            locations: OnceLock::new(),
        })
    }

    fn displayed_index(&self) -> Option<usize> {
        match self.current.load(Ordering::SeqCst) {
            NOT_DISPLAYED => None,
            index => Some(index),
        }
    }

    fn index_for(&self, reference: &str) -> Option<usize> {
        if is_cfi(reference) {
            return parse_cfi_spine_index(reference).filter(|index| *index < self.spine.len());
        }
        let path = strip_fragment(reference.trim());
        if path.is_empty() {
            return None;
        }
        self.spine
            .iter()
            .position(|doc| doc.href == path || doc.idref == path)
            .or_else(|| {
                self.spine.iter().position(|doc| {
                    doc.href.ends_with(&format!("/{path}"))
                        || path.ends_with(&format!("/{}", doc.href))
                })
            })
    }

    fn cfi_for(&self, index: usize) -> Option<String> {
        let doc = self.spine.get(index)?;
        Some(format!("epubcfi(/6/{}[{}]!/4/2)", (index + 1) * 2, doc.idref))
    }
}

#[async_trait]
impl RenderingEngine for EpubBook {
    fn metadata(&self) -> BookMetadata {
        self.metadata.clone()
    }

    fn toc(&self) -> Vec<TocItem> {
        self.toc.clone()
    }

    fn spine_get(&self, reference: &str) -> Option<SpineSection> {
        self.spine_at(self.index_for(reference)?)
    }

    fn spine_at(&self, index: usize) -> Option<SpineSection> {
        self.spine.get(index).map(|doc| SpineSection {
            index,
            href: doc.href.clone(),
            idref: doc.idref.clone(),
        })
    }

    async fn load_section(&self, section: &SpineSection) -> anyhow::Result<String> {
        let doc = self
            .spine
            .get(section.index)
            .filter(|doc| doc.href == section.href)
            .ok_or_else(|| anyhow::anyhow!("section not in spine: {}", section.href))?;
        Ok(doc.markup.clone())
    }

    async fn display(&self, target: Option<&str>) -> anyhow::Result<()> {
        let index = match target {
            Some(target) => self
                .index_for(target)
                .ok_or_else(|| anyhow::anyhow!("cannot resolve display target: {target}"))?,
            None => self.displayed_index().unwrap_or(0),
        };
        if let Some(anchor) = target.and_then(fragment) {
            tracing::trace!(anchor, "anchor positioning is not tracked");
        }
        self.current.store(index, Ordering::SeqCst);
        Ok(())
    }

    fn has_rendered_content(&self) -> bool {
        self.displayed_index()
            .and_then(|index| self.spine.get(index))
            .is_some_and(|doc| !doc.markup.trim().is_empty())
    }

    fn current_location(&self) -> Option<Location> {
        let index = self.displayed_index()?;
        Some(Location {
            start_href: self.spine.get(index).map(|doc| doc.href.clone()),
            start_cfi: self.cfi_for(index),
        })
    }

    async fn generate_locations(&self, chars_per_location: usize) -> anyhow::Result<()> {
        if chars_per_location == 0 {
            anyhow::bail!("chars per location must be > 0");
        }
        let mut offsets = Vec::with_capacity(self.spine.len() + 1);
        let mut total = 0usize;
        for doc in &self.spine {
            offsets.push(total);
            total += collect_paragraphs(&doc.markup)
                .iter()
                .map(|paragraph| paragraph.chars().count())
                .sum::<usize>();
        }
        offsets.push(total);
        tracing::debug!(
            locations = total.div_ceil(chars_per_location),
            "generated book locations"
        );
        let _ = self.locations.set(offsets);
        Ok(())
    }

    fn percentage_from_cfi(&self, cfi: &str) -> Option<f64> {
        let offsets = self.locations.get()?;
        let index = parse_cfi_spine_index(cfi).filter(|index| *index < self.spine.len())?;
        let total = *offsets.last()?;
        let start = *offsets.get(index)?;
        if total == 0 {
            return Some(index as f64 / self.spine.len() as f64);
        }
        Some(start as f64 / total as f64)
    }

    fn cfi_from_percentage(&self, percentage: f64) -> Option<String> {
        let offsets = self.locations.get()?;
        let total = *offsets.last()? as f64;
        let target = percentage.clamp(0.0, 1.0) * total;
        let index = offsets[..self.spine.len()]
            .iter()
            .rposition(|start| (*start as f64) <= target)
            .unwrap_or(0);
        self.cfi_for(index)
    }
}

fn read_entry(archive: &mut zip::ZipArchive<Cursor<&[u8]>>, name: &str) -> anyhow::Result<String> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("epub entry not found: {name}"))?;
    let mut out = String::new();
    entry
        .read_to_string(&mut out)
        .with_context(|| format!("read epub entry: {name}"))?;
    Ok(out)
}

/// `epubcfi(/6/4[...]!...)` names the second spine item.
fn parse_cfi_spine_index(cfi: &str) -> Option<usize> {
    let rest = cfi.strip_prefix("epubcfi(/6/")?;
    let digits = rest
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .filter(|digits| !digits.is_empty())?;
    let step = digits.parse::<usize>().ok()?;
    (step / 2).checked_sub(1)
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Resolves `href` against `dir`, folding `.` and `..` segments. The fragment is kept.
fn join_path(dir: &str, href: &str) -> String {
    let path = strip_fragment(href);
    let mut parts: Vec<&str> = dir.split('/').filter(|part| !part.is_empty()).collect();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            segment => parts.push(segment),
        }
    }
    let joined = parts.join("/");
    match fragment(href) {
        Some(hash) => format!("{joined}#{hash}"),
        None => joined,
    }
}

fn relative_to(dir: &str, path: &str) -> String {
    if dir.is_empty() {
        return path.to_owned();
    }
    path.strip_prefix(&format!("{dir}/"))
        .unwrap_or(path)
        .to_owned()
}

fn rebase_toc(items: Vec<TocItem>, nav_dir: &str, opf_dir: &str) -> Vec<TocItem> {
    items
        .into_iter()
        .map(|item| {
            let href = if strip_fragment(&item.href).is_empty() {
                item.href
            } else {
                relative_to(opf_dir, &join_path(nav_dir, &item.href))
            };
            TocItem {
                href,
                label: item.label,
                subitems: rebase_toc(item.subitems, nav_dir, opf_dir),
            }
        })
        .collect()
}

fn attr(
    reader: &quick_xml::Reader<&[u8]>,
    e: &quick_xml::events::BytesStart<'_>,
    key: &[u8],
) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key || attr.key.local_name().as_ref() == key)
        .map(|attr| {
            reader
                .decoder()
                .decode(attr.value.as_ref())
                .unwrap_or_default()
                .into_owned()
        })
}

fn parse_rootfile(container: &str) -> Option<String> {
    let mut reader = quick_xml::Reader::from_reader(container.as_bytes());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"rootfile" => {
                return attr(&reader, &e, b"full-path");
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

#[derive(Debug, Default)]
struct Package {
    metadata: BookMetadata,
    manifest: Vec<ManifestItem>,
    spine: Vec<String>,
    /// `toc` attribute of `<spine>` (EPUB 2 NCX id).
    toc_id: Option<String>,
}

impl Package {
    /// Prefers the EPUB 3 navigation document, then the NCX. The flag marks NCX.
    fn nav_item(&self) -> Option<(&ManifestItem, bool)> {
        if let Some(nav) = self
            .manifest
            .iter()
            .find(|item| item.properties.split_whitespace().any(|p| p == "nav"))
        {
            return Some((nav, false));
        }
        self.manifest
            .iter()
            .find(|item| Some(&item.id) == self.toc_id.as_ref())
            .or_else(|| {
                self.manifest
                    .iter()
                    .find(|item| item.media_type == NCX_MEDIA_TYPE)
            })
            .map(|item| (item, true))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum MetadataField {
    Title,
    Creator,
}

fn parse_package(opf: &str) -> Package {
    let mut reader = quick_xml::Reader::from_reader(opf.as_bytes());
    let mut package = Package::default();
    let mut field: Option<MetadataField> = None;
    let mut field_text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if matches!(e.local_name().as_ref(), b"title" | b"creator") => {
                field = match e.local_name().as_ref() {
                    b"title" if package.metadata.title.is_none() => Some(MetadataField::Title),
                    b"creator" if package.metadata.creator.is_none() => {
                        Some(MetadataField::Creator)
                    }
                    _ => None,
                };
                field_text.clear();
            }
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"item" => package.manifest.push(ManifestItem {
                    id: attr(&reader, &e, b"id").unwrap_or_default(),
                    href: attr(&reader, &e, b"href").unwrap_or_default(),
                    media_type: attr(&reader, &e, b"media-type").unwrap_or_default(),
                    properties: attr(&reader, &e, b"properties").unwrap_or_default(),
                }),
                b"itemref" => {
                    let linear = attr(&reader, &e, b"linear");
                    if let Some(idref) = attr(&reader, &e, b"idref")
                        && linear.as_deref() != Some("no")
                    {
                        package.spine.push(idref);
                    }
                }
                b"spine" => package.toc_id = attr(&reader, &e, b"toc"),
                _ => {}
            },
            Ok(Event::Text(e)) if field.is_some() => {
                field_text.push_str(&reader.decoder().decode(&e).unwrap_or_default());
            }
            Ok(Event::GeneralRef(e)) if field.is_some() => {
                field_text.push_str(&general_ref_text(&e));
            }
            Ok(Event::End(e)) if matches!(e.local_name().as_ref(), b"title" | b"creator") => {
                let text = collapse_whitespace(&field_text);
                match field.take() {
                    Some(MetadataField::Title) if !text.is_empty() => {
                        package.metadata.title = Some(text);
                    }
                    Some(MetadataField::Creator) if !text.is_empty() => {
                        package.metadata.creator = Some(text);
                    }
                    _ => {}
                }
                field_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                tracing::warn!(?err, "malformed package document; stopping early");
                break;
            }
            _ => {}
        }
        buf.clear();
    }
    package
}

/// Entity and character references arrive as their own events.
fn general_ref_text(e: &BytesRef<'_>) -> String {
    let Ok(name) = e.decode() else {
        return String::new();
    };
    let entity = format!("&{name};");
    match quick_xml::escape::unescape(&entity) {
        Ok(text) => text.into_owned(),
        Err(_) => entity,
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Default)]
struct PartialItem {
    href: String,
    label: String,
    children: Vec<TocItem>,
}

impl PartialItem {
    fn finish(self) -> TocItem {
        TocItem {
            href: self.href,
            label: collapse_whitespace(&self.label),
            subitems: self.children,
        }
    }
}

fn push_finished(stack: &mut [PartialItem], results: &mut Vec<TocItem>, item: TocItem) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(item),
        None => results.push(item),
    }
}

/// EPUB 3 navigation document: nested `ol/li/a` inside `<nav epub:type="toc">`.
fn parse_nav(source: &str) -> Vec<TocItem> {
    let mut reader = quick_xml::Reader::from_reader(source.as_bytes());
    let mut buf = Vec::new();
    let mut in_toc = false;
    let mut in_label = false;
    let mut stack: Vec<PartialItem> = Vec::new();
    let mut results = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"nav" => {
                    in_toc = attr(&reader, &e, b"epub:type")
                        .or_else(|| attr(&reader, &e, b"type"))
                        .is_some_and(|kind| kind.split_whitespace().any(|k| k == "toc"));
                }
                b"li" if in_toc => stack.push(PartialItem::default()),
                b"a" if in_toc => {
                    in_label = true;
                    if let Some(item) = stack.last_mut() {
                        item.href = attr(&reader, &e, b"href").unwrap_or_default();
                    }
                }
                _ => {}
            },
            Ok(Event::Text(e)) if in_toc && in_label => {
                if let Some(item) = stack.last_mut() {
                    item.label
                        .push_str(&reader.decoder().decode(&e).unwrap_or_default());
                }
            }
            Ok(Event::GeneralRef(e)) if in_toc && in_label => {
                if let Some(item) = stack.last_mut() {
                    item.label.push_str(&general_ref_text(&e));
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"a" => in_label = false,
                b"li" if in_toc => {
                    if let Some(item) = stack.pop() {
                        let item = item.finish();
                        push_finished(&mut stack, &mut results, item);
                    }
                }
                b"nav" if in_toc => {
                    in_toc = false;
                    if !results.is_empty() {
                        break;
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => {
                tracing::warn!(?err, "malformed navigation document; stopping early");
                break;
            }
            _ => {}
        }
        buf.clear();
    }
    results
}

/// EPUB 2 NCX: nested `navPoint` elements with `navLabel/text` and `content@src`.
fn parse_ncx(source: &str) -> Vec<TocItem> {
    let mut reader = quick_xml::Reader::from_reader(source.as_bytes());
    let mut buf = Vec::new();
    let mut in_nav_map = false;
    let mut in_text = false;
    let mut stack: Vec<PartialItem> = Vec::new();
    let mut results = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"navMap" => in_nav_map = true,
                b"navPoint" if in_nav_map => stack.push(PartialItem::default()),
                b"text" if in_nav_map => in_text = true,
                b"content" if in_nav_map => {
                    if let Some(item) = stack.last_mut() {
                        item.href = attr(&reader, &e, b"src").unwrap_or_default();
                    }
                }
                _ => {}
            },
            Ok(Event::Text(e)) if in_text => {
                if let Some(item) = stack.last_mut() {
                    item.label
                        .push_str(&reader.decoder().decode(&e).unwrap_or_default());
                }
            }
            Ok(Event::GeneralRef(e)) if in_text => {
                if let Some(item) = stack.last_mut() {
                    item.label.push_str(&general_ref_text(&e));
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"text" => in_text = false,
                b"navPoint" => {
                    if let Some(item) = stack.pop() {
                        let item = item.finish();
                        push_finished(&mut stack, &mut results, item);
                    }
                }
                b"navMap" => in_nav_map = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => {
                tracing::warn!(?err, "malformed NCX document; stopping early");
                break;
            }
            _ => {}
        }
        buf.clear();
    }
    results
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use zip::write::SimpleFileOptions;

    use super::*;

    const CONTAINER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

    const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="id">urn:uuid:1</dc:identifier>
    <dc:title>Fixture Book</dc:title>
    <dc:creator>Ada Writer</dc:creator>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="c1" href="Text/c1.xhtml" media-type="application/xhtml+xml"/>
    <item id="c2" href="Text/c2.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="c1"/>
    <itemref idref="c2"/>
  </spine>
</package>
"#;

    const NAV: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>Contents</title></head>
<body>
  <nav epub:type="toc">
    <ol>
      <li><a href="Text/c1.xhtml">One</a>
        <ol><li><a href="Text/c1.xhtml#a">One <em>A</em></a></li></ol>
      </li>
      <li><a href="Text/c2.xhtml#s2">Two</a></li>
    </ol>
  </nav>
</body>
</html>
"#;

    const NCX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>
    <navPoint id="n1" playOrder="1">
      <navLabel><text>First</text></navLabel>
      <content src="Text/c1.xhtml"/>
      <navPoint id="n2" playOrder="2">
        <navLabel><text>Nested</text></navLabel>
        <content src="Text/c1.xhtml#a"/>
      </navPoint>
    </navPoint>
    <navPoint id="n3" playOrder="3">
      <navLabel><text>Second</text></navLabel>
      <content src="Text/c2.xhtml"/>
    </navPoint>
  </navMap>
</ncx>
"#;

    fn chapter(body: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>t</title></head><body>{body}</body></html>"
        )
    }

    fn build(files: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, contents) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(contents.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn fixture(with_nav: bool) -> Vec<u8> {
        let c1 = chapter("<h1>One</h1><p>Alpha beta.</p>");
        let c2 = chapter("<p>Gamma delta epsilon.</p>");
        let opf = if with_nav {
            OPF.to_owned()
        } else {
            OPF.replace(r#" properties="nav""#, "")
        };
        build(&[
            ("mimetype", "application/epub+zip"),
            (CONTAINER_PATH, CONTAINER),
            ("OEBPS/content.opf", &opf),
            ("OEBPS/nav.xhtml", NAV),
            ("OEBPS/toc.ncx", NCX),
            ("OEBPS/Text/c1.xhtml", &c1),
            ("OEBPS/Text/c2.xhtml", &c2),
        ])
    }

    #[test]
    fn reads_metadata_spine_and_nav_toc() {
        let book = EpubBook::from_bytes(&fixture(true)).unwrap();
        assert_eq!(book.metadata().title.as_deref(), Some("Fixture Book"));
        assert_eq!(book.metadata().creator.as_deref(), Some("Ada Writer"));

        let toc = book.toc();
        assert_eq!(toc.len(), 2);
        assert_eq!(toc[0].href, "Text/c1.xhtml");
        assert_eq!(toc[0].subitems[0].label, "One A");
        assert_eq!(toc[0].subitems[0].href, "Text/c1.xhtml#a");
        assert_eq!(toc[1].href, "Text/c2.xhtml#s2");

        assert_eq!(book.spine_get("c2.xhtml").unwrap().index, 1);
        assert_eq!(book.spine_get("Text/c2.xhtml#s2").unwrap().href, "Text/c2.xhtml");
        assert_eq!(book.spine_get("c1").unwrap().index, 0);
        assert!(book.spine_get("missing.xhtml").is_none());
    }

    #[test]
    fn falls_back_to_ncx() {
        let book = EpubBook::from_bytes(&fixture(false)).unwrap();
        let toc = book.toc();
        assert_eq!(toc.len(), 2);
        assert_eq!(toc[0].label, "First");
        assert_eq!(toc[0].subitems[0].label, "Nested");
        assert_eq!(toc[1].href, "Text/c2.xhtml");
    }

    #[test]
    fn entity_references_survive_in_titles_and_labels() {
        let opf = OPF
            .replace("Fixture Book", "Pride &amp; Prejudice")
            .replace("Ada Writer", "Jane  &#65;usten");
        let package = parse_package(&opf);
        assert_eq!(package.metadata.title.as_deref(), Some("Pride & Prejudice"));
        assert_eq!(package.metadata.creator.as_deref(), Some("Jane Austen"));

        let nav = parse_nav(&NAV.replace(">Two<", ">Tom &amp; Jerry &lt;3<"));
        assert_eq!(nav[1].label, "Tom & Jerry <3");
        assert_eq!(nav[0].subitems[0].label, "One A");

        let ncx = parse_ncx(&NCX.replace(
            "<text>Second</text>",
            "<text>Salt &#38; Pepper</text>",
        ));
        assert_eq!(ncx[1].label, "Salt & Pepper");
    }

    #[tokio::test]
    async fn display_tracks_location_and_cfi_round_trips() {
        let book = EpubBook::from_bytes(&fixture(true)).unwrap();
        assert!(!book.has_rendered_content());
        assert!(book.display(Some("nowhere.xhtml")).await.is_err());

        book.display(Some("Text/c2.xhtml#s2")).await.unwrap();
        let location = book.current_location().unwrap();
        assert_eq!(location.start_href.as_deref(), Some("Text/c2.xhtml"));
        let cfi = location.start_cfi.unwrap();
        assert_eq!(cfi, "epubcfi(/6/4[c2]!/4/2)");
        assert_eq!(book.spine_get(&cfi).unwrap().index, 1);

        assert!(book.percentage_from_cfi(&cfi).is_none());
        book.generate_locations(1600).await.unwrap();
        let pct = book.percentage_from_cfi(&cfi).unwrap();
        assert!(pct > 0.0 && pct < 1.0);
        assert_eq!(book.cfi_from_percentage(0.0).unwrap(), "epubcfi(/6/2[c1]!/4/2)");
        assert_eq!(book.cfi_from_percentage(1.0).unwrap(), cfi);
    }

    #[tokio::test]
    async fn load_section_returns_markup() {
        let book = EpubBook::from_bytes(&fixture(true)).unwrap();
        let section = book.spine_at(0).unwrap();
        let markup = book.load_section(&section).await.unwrap();
        assert!(markup.contains("Alpha beta."));
    }

    #[test]
    fn rejects_archives_without_container() {
        let bytes = build(&[("mimetype", "application/epub+zip")]);
        assert!(EpubBook::from_bytes(&bytes).is_err());
    }

    #[test]
    fn join_path_folds_dot_segments() {
        assert_eq!(join_path("OEBPS/nav", "../Text/c1.xhtml#x"), "OEBPS/Text/c1.xhtml#x");
        assert_eq!(join_path("", "./a.xhtml"), "a.xhtml");
        assert_eq!(relative_to("OEBPS", "OEBPS/Text/c1.xhtml"), "Text/c1.xhtml");
    }
}
