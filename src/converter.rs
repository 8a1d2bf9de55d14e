//! PDF 到 DOCX 的转换适配层：先校验输入，再把解析与生成交给阻塞线程池。

use lopdf::{Document, Object, ObjectId};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{error, info};

use crate::atomic::AtomicFile;
use crate::docx::DocxDocument;
use crate::storage::Storage;

pub const TARGET_EXTENSION: &str = "docx";
const MAX_INHERIT_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Conversion failed: Invalid PDF file: {0}")]
    InvalidInput(String),
    #[error("Conversion failed: {0}")]
    Failed(String),
    #[error("Conversion failed: {0}")]
    Io(#[from] std::io::Error),
}

/// 单次请求内的转换任务，不做持久化。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    pub input: PathBuf,
    pub output: PathBuf,
}

impl ConversionJob {
    /// 未指定输出路径时，使用 `<output_dir>/<输入文件名去扩展名>.docx`。
    pub fn new(
        input: &Path,
        output_dir: &Path,
        output: Option<&Path>,
    ) -> Result<Self, ConversionError> {
        let output = match output {
            Some(path) => path.to_path_buf(),
            None => {
                let stem = input.file_stem().ok_or_else(|| {
                    ConversionError::Failed("input path has no file name".into())
                })?;
                output_dir.join(stem).with_extension(TARGET_EXTENSION)
            }
        };
        Ok(Self {
            input: input.to_path_buf(),
            output,
        })
    }
}

#[derive(Debug)]
pub struct PdfToDocxConverter {
    output: Storage,
}

impl PdfToDocxConverter {
    pub fn new(output: Storage) -> Self {
        Self { output }
    }

    pub fn output_storage(&self) -> &Storage {
        &self.output
    }

    /// 转换 `input`，成功时返回完整写出的 DOCX 路径。
    pub async fn convert(
        &self,
        input: &Path,
        output: Option<&Path>,
    ) -> Result<PathBuf, ConversionError> {
        let job = ConversionJob::new(input, self.output.root_path(), output)?;
        match self.run(&job).await {
            Ok(pages) => {
                info!(input = ?job.input, output = ?job.output, pages, "conversion finished");
                Ok(job.output)
            }
            Err(err) => {
                error!(input = ?job.input, error = %err, "conversion failed");
                Err(err)
            }
        }
    }

    async fn run(&self, job: &ConversionJob) -> Result<usize, ConversionError> {
        let input = job.input.clone();
        let (bytes, pages) = tokio::task::spawn_blocking(move || render_docx(&input))
            .await
            .map_err(|err| ConversionError::Failed(err.to_string()))??;

        if let Some(parent) = job.output.parent() {
            fs::create_dir_all(parent).await?;
        }
        AtomicFile::new(&job.output)
            .await?
            .write_all(&bytes)
            .await?
            .finalize()
            .await?;
        Ok(pages)
    }
}

/// 校验输入能被解析为 PDF，不满足时不进入转换。
pub fn validate_pdf(path: &Path) -> Result<Document, ConversionError> {
    let pdf = Document::load(path).map_err(|err| ConversionError::InvalidInput(err.to_string()))?;
    if pdf.is_encrypted() {
        return Err(ConversionError::InvalidInput(
            "encrypted documents are not supported".into(),
        ));
    }
    Ok(pdf)
}

fn render_docx(path: &Path) -> Result<(Vec<u8>, usize), ConversionError> {
    let pdf = validate_pdf(path)?;
    let pages = pdf.get_pages();

    let mut docx = DocxDocument::new();
    if let Some(title) = document_title(&pdf) {
        docx = docx.with_title(title);
    }
    if let Some((width, height)) = pages
        .values()
        .next()
        .and_then(|page_id| page_size(&pdf, *page_id))
    {
        docx = docx.with_page_size(width, height);
    }

    for number in pages.keys() {
        let text = pdf
            .extract_text(&[*number])
            .map_err(|err| ConversionError::Failed(format!("page {number}: {err}")))?;
        docx.push_page(&text);
    }

    let bytes = docx
        .to_bytes()
        .map_err(|err| ConversionError::Failed(err.to_string()))?;
    Ok((bytes, docx.page_count()))
}

fn document_title(pdf: &Document) -> Option<String> {
    let info = match pdf.trailer.get(b"Info").ok()? {
        Object::Reference(id) => pdf.get_dictionary(*id).ok()?,
        Object::Dictionary(dict) => dict,
        _ => return None,
    };
    match info.get(b"Title").ok()? {
        Object::String(bytes, _) => Some(decode_text_string(bytes)),
        _ => None,
    }
}

/// PDF 文本串：带 BOM 时按 UTF-16BE，否则按单字节编码逐字节映射。
fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| b as char).collect()
}

/// 读取页面 MediaBox（单位为点），沿 `Parent` 处理继承。
fn page_size(pdf: &Document, page_id: ObjectId) -> Option<(f32, f32)> {
    let mut current = pdf.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_INHERIT_DEPTH {
        if let Ok(Object::Array(values)) = current.get(b"MediaBox") {
            let numbers: Vec<f32> = values.iter().filter_map(|v| v.as_float().ok()).collect();
            return match numbers[..] {
                [x1, y1, x2, y2] => Some(((x2 - x1).abs(), (y2 - y1).abs())),
                _ => None,
            };
        }
        let parent = current.get(b"Parent").and_then(Object::as_reference).ok()?;
        current = pdf.get_dictionary(parent).ok()?;
    }
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::docx::tests::{paragraph_texts, read_document_xml};
    use lopdf::content::{Content, Operation};
    use lopdf::{Stream, dictionary};
    use tempfile::tempdir;

    /// 生成每页一行文本的 PDF。
    pub(crate) fn write_sample_pdf(path: &Path, pages: &[&str]) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![72.into(), 700.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                content.encode().expect("encode content"),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal("Sample Report"),
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);
        doc.save(path).expect("save sample pdf");
    }

    fn make_converter() -> (tempfile::TempDir, PdfToDocxConverter) {
        let temp = tempdir().expect("tempdir");
        let output = temp.path().join("converted");
        std::fs::create_dir_all(&output).expect("create output dir");
        (temp, PdfToDocxConverter::new(Storage::new(output)))
    }

    #[test]
    fn job_derives_output_from_input_stem() {
        let job = ConversionJob::new(
            Path::new("/srv/uploads/20260101_000000_abcd1234_report.pdf"),
            Path::new("/tmp/out"),
            None,
        )
        .expect("job");
        assert_eq!(
            job.output,
            PathBuf::from("/tmp/out/20260101_000000_abcd1234_report.docx")
        );

        let explicit = ConversionJob::new(
            Path::new("/srv/uploads/a.pdf"),
            Path::new("/tmp/out"),
            Some(Path::new("/elsewhere/b.docx")),
        )
        .expect("job");
        assert_eq!(explicit.output, PathBuf::from("/elsewhere/b.docx"));
    }

    #[test]
    fn decode_text_string_handles_utf16_bom() {
        assert_eq!(decode_text_string(&[0xFE, 0xFF, 0x00, 0x41, 0x00, 0xE9]), "Aé");
        assert_eq!(decode_text_string(b"Plain"), "Plain");
    }

    #[tokio::test]
    async fn converts_well_formed_pdf_to_docx() {
        let (temp, converter) = make_converter();
        let input = temp.path().join("report.pdf");
        write_sample_pdf(&input, &["Hello World", "Second Page"]);

        let output = converter.convert(&input, None).await.expect("convert");
        assert_eq!(output, converter.output_storage().root_path().join("report.docx"));

        let bytes = std::fs::read(&output).expect("read docx");
        let texts = paragraph_texts(&read_document_xml(&bytes));
        assert_eq!(texts.first().map(String::as_str), Some("Sample Report"));
        let joined = texts.join("\n");
        assert!(joined.contains("Hello"), "{joined}");
        assert!(joined.contains("Second"), "{joined}");
    }

    #[tokio::test]
    async fn rejects_non_pdf_without_writing_output() {
        let (temp, converter) = make_converter();
        let input = temp.path().join("fake.pdf");
        std::fs::write(&input, b"this is not a pdf").expect("write fake");

        let result = converter.convert(&input, None).await;
        let err = result.expect_err("fake pdf must fail");
        assert!(matches!(err, ConversionError::InvalidInput(_)));
        assert!(err.to_string().contains("Invalid PDF file"));
        let outputs = std::fs::read_dir(converter.output_storage().root_path())
            .expect("read output dir")
            .count();
        assert_eq!(outputs, 0);
    }

    #[tokio::test]
    async fn missing_input_is_a_conversion_error() {
        let (temp, converter) = make_converter();
        let result = converter.convert(&temp.path().join("gone.pdf"), None).await;
        assert!(result.is_err());
    }
}
