use std::io::{Cursor, Write as _};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;

pub const TITLE: &str = "The Three Rooms";

const CONTAINER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="id">urn:uuid:three-rooms</dc:identifier>
    <dc:title>The Three Rooms</dc:title>
    <dc:creator>Ada Writer</dc:creator>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="c1" href="c1.xhtml" media-type="application/xhtml+xml"/>
    <item id="c2" href="c2.xhtml" media-type="application/xhtml+xml"/>
    <item id="c3" href="c3.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="c1"/>
    <itemref idref="c2"/>
    <itemref idref="c3"/>
  </spine>
</package>
"#;

const NAV: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>Contents</title></head>
<body>
  <nav epub:type="toc">
    <ol>
      <li><a href="c1.xhtml">The Hall</a></li>
      <li><a href="c2.xhtml#start">The Study</a></li>
      <li><a href="c3.xhtml">The Garden</a></li>
    </ol>
  </nav>
</body>
</html>
"#;

pub const CHAPTERS: [&[&str]; 3] = [
    &["The hall was cold.", "Nobody had lit the fire."],
    &["The study smelled of ink.", "A letter lay open.", "It was unsigned."],
    &["Rain fell on the garden."],
];

fn chapter(paragraphs: &[&str]) -> String {
    let body = paragraphs
        .iter()
        .map(|p| format!("<p>{p}</p>"))
        .collect::<String>();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>t</title></head><body><section id=\"start\">{body}</section></body></html>"
    )
}

/// Chapter text as sent for translation.
#[allow(dead_code)]
pub fn chapter_text(index: usize) -> String {
    CHAPTERS[index].join("\n\n")
}

pub fn epub_bytes() -> Vec<u8> {
    let chapters: Vec<String> = CHAPTERS.iter().map(|paragraphs| chapter(paragraphs)).collect();
    let files = [
        ("mimetype", "application/epub+zip"),
        ("META-INF/container.xml", CONTAINER),
        ("content.opf", OPF),
        ("nav.xhtml", NAV),
        ("c1.xhtml", chapters[0].as_str()),
        ("c2.xhtml", chapters[1].as_str()),
        ("c3.xhtml", chapters[2].as_str()),
    ];

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, contents) in files {
        zip.start_file(name, options).expect("start zip entry");
        zip.write_all(contents.as_bytes()).expect("write zip entry");
    }
    zip.finish().expect("finish zip").into_inner()
}

pub fn write_epub(dir: &Path) -> PathBuf {
    let path = dir.join("three-rooms.epub");
    std::fs::write(&path, epub_bytes()).expect("write fixture epub");
    path
}
