//! 最小 WordprocessingML（DOCX）写入器：每行一个段落，PDF 分页处插入分页符。

use chrono::{SecondsFormat, Utc};
use std::io::{Cursor, Write};
use thiserror::Error;
use xmltree::{Element, EmitterConfig, Namespace, XMLNode};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const POINTS_TO_TWIPS: f32 = 20.0;
/// A4 纸张尺寸（twips）。
const DEFAULT_PAGE_TWIPS: (u32, u32) = (11906, 16838);
const PAGE_MARGIN_TWIPS: u32 = 1440;
const CREATOR: &str = "axo-convert";

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const CP_NS: &str = "http://schemas.openxmlformats.org/package/2006/metadata/core-properties";
const DC_NS: &str = "http://purl.org/dc/elements/1.1/";
const DCTERMS_NS: &str = "http://purl.org/dc/terms/";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

#[derive(Debug, Error)]
pub enum DocxError {
    #[error("xml: {0}")]
    Xml(#[from] xmltree::Error),
    #[error("zip: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/><Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/></Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/></Relationships>"#;

const DOCUMENT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

const STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:docDefaults><w:rPrDefault><w:rPr><w:rFonts w:ascii="Calibri" w:hAnsi="Calibri" w:eastAsia="SimSun" w:cs="Calibri"/><w:sz w:val="22"/></w:rPr></w:rPrDefault><w:pPrDefault><w:pPr><w:spacing w:after="120" w:line="259" w:lineRule="auto"/></w:pPr></w:pPrDefault></w:docDefaults><w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/><w:qFormat/></w:style><w:style w:type="paragraph" w:styleId="Title"><w:name w:val="Title"/><w:basedOn w:val="Normal"/><w:qFormat/><w:rPr><w:b/><w:sz w:val="36"/></w:rPr></w:style></w:styles>"#;

/// 待写出的 DOCX 文档。
#[derive(Debug, Default, Clone)]
pub struct DocxDocument {
    title: Option<String>,
    page_size: Option<(f32, f32)>,
    pages: Vec<Vec<String>>,
}

impl DocxDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        let trimmed = title.trim();
        if !trimmed.is_empty() {
            self.title = Some(trimmed.to_string());
        }
        self
    }

    /// 页面尺寸，单位为 PDF 点（1/72 英寸）。
    pub fn with_page_size(mut self, width: f32, height: f32) -> Self {
        if width > 0.0 && height > 0.0 {
            self.page_size = Some((width, height));
        }
        self
    }

    /// 追加一页文本，按行拆分为段落。
    pub fn push_page(&mut self, text: &str) {
        let lines = text
            .lines()
            .map(|line| line.trim_end().to_string())
            .collect();
        self.pages.push(lines);
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// 打包为完整的 DOCX 容器字节。
    pub fn to_bytes(&self) -> Result<Vec<u8>, DocxError> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let parts: [(&str, Vec<u8>); 6] = [
            ("[Content_Types].xml", CONTENT_TYPES_XML.as_bytes().to_vec()),
            ("_rels/.rels", ROOT_RELS_XML.as_bytes().to_vec()),
            ("word/_rels/document.xml.rels", DOCUMENT_RELS_XML.as_bytes().to_vec()),
            ("word/styles.xml", STYLES_XML.as_bytes().to_vec()),
            ("docProps/core.xml", write_xml(&self.core_xml())?),
            ("word/document.xml", write_xml(&self.document_xml())?),
        ];
        for (name, content) in parts {
            zip.start_file(name, options)?;
            zip.write_all(&content)?;
        }

        Ok(zip.finish()?.into_inner())
    }

    fn document_xml(&self) -> Element {
        let mut body = element("w:body", &[]);
        if let Some(title) = &self.title {
            let style = element("w:pStyle", &[("w:val", "Title")]);
            let properties = with_children(element("w:pPr", &[]), vec![style]);
            body.children.push(XMLNode::Element(with_children(
                element("w:p", &[]),
                vec![properties, run(title)],
            )));
        }
        for (index, page) in self.pages.iter().enumerate() {
            if index > 0 {
                let page_break = element("w:br", &[("w:type", "page")]);
                let break_run = with_children(element("w:r", &[]), vec![page_break]);
                body.children.push(XMLNode::Element(with_children(
                    element("w:p", &[]),
                    vec![break_run],
                )));
            }
            for line in page {
                let mut paragraph = element("w:p", &[]);
                if !line.is_empty() {
                    paragraph.children.push(XMLNode::Element(run(line)));
                }
                body.children.push(XMLNode::Element(paragraph));
            }
        }

        let (width, height) = self
            .page_size
            .map(|(w, h)| {
                (
                    (w * POINTS_TO_TWIPS).round() as u32,
                    (h * POINTS_TO_TWIPS).round() as u32,
                )
            })
            .unwrap_or(DEFAULT_PAGE_TWIPS);
        let width = width.to_string();
        let height = height.to_string();
        let margin = PAGE_MARGIN_TWIPS.to_string();
        let page_size = element(
            "w:pgSz",
            &[("w:w", width.as_str()), ("w:h", height.as_str())],
        );
        let page_margin = element(
            "w:pgMar",
            &[
                ("w:top", margin.as_str()),
                ("w:right", margin.as_str()),
                ("w:bottom", margin.as_str()),
                ("w:left", margin.as_str()),
                ("w:header", "708"),
                ("w:footer", "708"),
                ("w:gutter", "0"),
            ],
        );
        body.children.push(XMLNode::Element(with_children(
            element("w:sectPr", &[]),
            vec![page_size, page_margin],
        )));

        let mut document = with_children(element("w:document", &[]), vec![body]);
        document.namespaces = Some(namespaces(&[("w", W_NS), ("r", R_NS)]));
        document
    }

    fn core_xml(&self) -> Element {
        let mut children = Vec::new();
        if let Some(title) = &self.title {
            children.push(text_element("dc:title", &[], title));
        }
        children.push(text_element("dc:creator", &[], CREATOR));
        let created = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        children.push(text_element(
            "dcterms:created",
            &[("xsi:type", "dcterms:W3CDTF")],
            &created,
        ));

        let mut core = with_children(element("cp:coreProperties", &[]), children);
        core.namespaces = Some(namespaces(&[
            ("cp", CP_NS),
            ("dc", DC_NS),
            ("dcterms", DCTERMS_NS),
            ("xsi", XSI_NS),
        ]));
        core
    }
}

/// 按 `prefix:name` 构造元素，属性名原样写出。
fn element(qualified: &str, attributes: &[(&str, &str)]) -> Element {
    let mut element = match qualified.split_once(':') {
        Some((prefix, name)) => {
            let mut element = Element::new(name);
            element.prefix = Some(prefix.to_string());
            element
        }
        None => Element::new(qualified),
    };
    for (name, value) in attributes {
        element.attributes.insert(name.to_string(), value.to_string());
    }
    element
}

fn with_children(mut parent: Element, children: Vec<Element>) -> Element {
    parent
        .children
        .extend(children.into_iter().map(XMLNode::Element));
    parent
}

fn text_element(qualified: &str, attributes: &[(&str, &str)], text: &str) -> Element {
    let mut element = element(qualified, attributes);
    element.children.push(XMLNode::Text(xml_text(text)));
    element
}

fn run(text: &str) -> Element {
    let text = text_element("w:t", &[("xml:space", "preserve")], text);
    with_children(element("w:r", &[]), vec![text])
}

fn namespaces(bindings: &[(&str, &str)]) -> Namespace {
    let mut namespace = Namespace::empty();
    for (prefix, uri) in bindings {
        namespace.put(*prefix, *uri);
    }
    namespace
}

fn write_xml(root: &Element) -> Result<Vec<u8>, DocxError> {
    let mut out = Vec::new();
    root.write_with_config(
        &mut out,
        EmitterConfig::new()
            .perform_indent(false)
            .write_document_declaration(true),
    )?;
    Ok(out)
}

/// 丢弃 XML 1.0 不允许的控制字符，制表符替换为空格；转义由写出器完成。
fn xml_text(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            '\t' => Some(' '),
            c if (c as u32) < 0x20 || c == '\u{FFFE}' || c == '\u{FFFF}' => None,
            c => Some(c),
        })
        .collect()
}
