//! Image conversions on the `image` crate, plus PDF wrapping and OCR.
//!
//! Every operation whose output name ends in `.jpg` writes JPEG regardless
//! of the input format; transparent pixels are composited onto white first
//! because JPEG has no alpha channel.

use crate::config::SUPPORTED_OCR_LANGUAGES;
use crate::converters::pdf::PdfiumBinding;
use crate::converters::tools::Tool;
use crate::converters::{ensure_parent, failed, Parameters};
use crate::error::OperationError;
use ::image::codecs::jpeg::JpegEncoder;
use ::image::imageops::FilterType;
use ::image::{DynamicImage, GrayImage, ImageFormat, Luma, RgbImage};
use pdfium_render::prelude::*;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// JPEG quality for operations that do not take a `quality` parameter.
const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Fraction of the A4 page the image may occupy in `image_to_pdf`.
const PDF_IMAGE_SCALE: f32 = 0.8;

/// Named filters for `image_filter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFilter {
    Blur,
    Sharpen,
    Smooth,
    Grayscale,
    Enhance,
}

impl FromStr for ImageFilter {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blur" => Ok(ImageFilter::Blur),
            "sharpen" => Ok(ImageFilter::Sharpen),
            "smooth" => Ok(ImageFilter::Smooth),
            "grayscale" | "greyscale" => Ok(ImageFilter::Grayscale),
            "enhance" => Ok(ImageFilter::Enhance),
            other => Err(OperationError::invalid_parameter(
                "filter_type",
                format!("'{other}' is not one of blur, sharpen, smooth, grayscale, enhance"),
            )),
        }
    }
}

/// Image operations.
#[derive(Debug, Clone)]
pub struct ImageConverter {
    pdfium: PdfiumBinding,
    tesseract: PathBuf,
    ocr_language: String,
}

impl ImageConverter {
    pub fn new(pdfium: PdfiumBinding, tesseract: PathBuf, ocr_language: String) -> Self {
        Self {
            pdfium,
            tesseract,
            ocr_language,
        }
    }

    /// `image_resize`: fit inside width×height (never enlarging) when keeping
    /// the aspect ratio, otherwise stretch to exactly width×height.
    pub fn resize(
        &self,
        input: &Path,
        output: &Path,
        params: &Parameters,
    ) -> Result<PathBuf, OperationError> {
        let width: u32 = params.parse_or("width", 800)?;
        let height: u32 = params.parse_or("height", 600)?;
        let keep_aspect = params.flag_or("maintain_aspect", true)?;
        if width == 0 || height == 0 {
            return Err(OperationError::invalid_parameter(
                "width/height",
                "dimensions must be positive",
            ));
        }

        let run = || -> Result<PathBuf, OperationError> {
            let img = open(input)?;
            let resized = if keep_aspect {
                if img.width() <= width && img.height() <= height {
                    img
                } else {
                    img.resize(width, height, FilterType::Lanczos3)
                }
            } else {
                img.resize_exact(width, height, FilterType::Lanczos3)
            };
            debug!("Resized to {}x{}", resized.width(), resized.height());
            save_jpeg(&resized, output, DEFAULT_JPEG_QUALITY)?;
            Ok(output.to_path_buf())
        };
        run().map_err(|e| failed("Image resize", e))
    }

    /// `image_format`: re-encode in the format named by the output extension.
    pub fn convert_format(&self, input: &Path, output: &Path) -> Result<PathBuf, OperationError> {
        let run = || -> Result<PathBuf, OperationError> {
            let img = open(input)?;
            let format = ImageFormat::from_path(output)
                .map_err(|e| OperationError::image("Unknown target format", e))?;
            match format {
                ImageFormat::Jpeg => save_jpeg(&img, output, DEFAULT_JPEG_QUALITY)?,
                // GIF and BMP encoders reject 16-bit and float buffers.
                ImageFormat::Gif | ImageFormat::Bmp => {
                    ensure_parent(output)?;
                    DynamicImage::ImageRgba8(img.to_rgba8())
                        .save_with_format(output, format)
                        .map_err(|e| OperationError::image("encode", e))?
                }
                _ => {
                    ensure_parent(output)?;
                    img.save_with_format(output, format)
                        .map_err(|e| OperationError::image("encode", e))?
                }
            }
            Ok(output.to_path_buf())
        };
        run().map_err(|e| failed("Image format conversion", e))
    }

    /// `image_compress`: JPEG at `quality` (1–100).
    pub fn compress(
        &self,
        input: &Path,
        output: &Path,
        params: &Parameters,
    ) -> Result<PathBuf, OperationError> {
        let quality: u8 = params.parse_or("quality", 85)?;
        if !(1..=100).contains(&quality) {
            return Err(OperationError::invalid_parameter(
                "quality",
                format!("{quality} is outside 1-100"),
            ));
        }
        let run = || -> Result<PathBuf, OperationError> {
            save_jpeg(&open(input)?, output, quality)?;
            Ok(output.to_path_buf())
        };
        run().map_err(|e| failed("Image compression", e))
    }

    /// `image_filter`.
    pub fn filter(
        &self,
        input: &Path,
        output: &Path,
        params: &Parameters,
    ) -> Result<PathBuf, OperationError> {
        let filter: ImageFilter = params.text_or("filter_type", "enhance").parse()?;
        let run = || -> Result<PathBuf, OperationError> {
            let img = open(input)?;
            let filtered = apply_filter(&img, filter);
            save_jpeg(&filtered, output, DEFAULT_JPEG_QUALITY)?;
            Ok(output.to_path_buf())
        };
        run().map_err(|e| failed("Image filter", e))
    }

    /// `image_rotate`: counter-clockwise by `angle` degrees.
    pub fn rotate(
        &self,
        input: &Path,
        output: &Path,
        params: &Parameters,
    ) -> Result<PathBuf, OperationError> {
        let angle: i64 = match params.parse_opt::<i64>("angle")? {
            Some(a) => a,
            None => params.parse_or("rotate_angle", 90)?,
        };
        let quarter_turns = quarter_turns(angle)?;
        let run = || -> Result<PathBuf, OperationError> {
            let img = open(input)?;
            // `image` rotates clockwise; a counter-clockwise quarter turn is
            // three clockwise ones.
            let rotated = match quarter_turns {
                0 => img,
                1 => img.rotate270(),
                2 => img.rotate180(),
                _ => img.rotate90(),
            };
            save_jpeg(&rotated, output, DEFAULT_JPEG_QUALITY)?;
            Ok(output.to_path_buf())
        };
        run().map_err(|e| failed("Image rotation", e))
    }

    /// `image_to_pdf`: one A4 page, image scaled to 80% of the page and centred.
    pub fn to_pdf(&self, input: &Path, output: &Path) -> Result<PathBuf, OperationError> {
        let run = || -> Result<PathBuf, OperationError> {
            let img = open(input)?;
            let pdfium = self.pdfium.bind()?;
            let pdf_err = |context: &str| {
                let context = context.to_string();
                move |e: PdfiumError| OperationError::Pdf {
                    context,
                    detail: format!("{e:?}"),
                }
            };

            let mut document = pdfium.create_new_pdf().map_err(pdf_err("create PDF"))?;
            {
                let mut page = document
                    .pages_mut()
                    .create_page_at_end(PdfPagePaperSize::a4())
                    .map_err(pdf_err("add page"))?;
                let page_w = page.width().value;
                let page_h = page.height().value;
                let (x, y, w, h) = fit_centered(
                    img.width() as f32,
                    img.height() as f32,
                    page_w,
                    page_h,
                    PDF_IMAGE_SCALE,
                );
                page.objects_mut()
                    .create_image_object(
                        PdfPoints::new(x),
                        PdfPoints::new(y),
                        &img,
                        Some(PdfPoints::new(w)),
                        Some(PdfPoints::new(h)),
                    )
                    .map_err(pdf_err("place image"))?;
            }
            ensure_parent(output)?;
            document
                .save_to_file(output)
                .map_err(pdf_err("save PDF"))?;
            Ok(output.to_path_buf())
        };
        run().map_err(|e| failed("Image to PDF conversion", e))
    }

    /// `image_to_text`: grayscale + Otsu binarisation, then tesseract.
    pub fn to_text(
        &self,
        input: &Path,
        output: &Path,
        params: &Parameters,
    ) -> Result<PathBuf, OperationError> {
        let language = params.text_or("ocr_language", &self.ocr_language);
        if !SUPPORTED_OCR_LANGUAGES.contains(&language.as_str()) {
            return Err(OperationError::invalid_parameter(
                "ocr_language",
                format!(
                    "'{language}' is not one of {}",
                    SUPPORTED_OCR_LANGUAGES.join(", ")
                ),
            ));
        }
        let run = || -> Result<PathBuf, OperationError> {
            let gray = open(input)?.to_luma8();
            let binary = binarize(&gray);

            let scratch = tempfile::Builder::new()
                .prefix("converter_ocr_")
                .suffix(".png")
                .tempfile()
                .map_err(|e| OperationError::io("create OCR scratch file", e))?;
            binary
                .save_with_format(scratch.path(), ImageFormat::Png)
                .map_err(|e| OperationError::image("write OCR scratch file", e))?;

            let out = Tool::new(&self.tesseract, "OCR")
                .arg(scratch.path())
                .arg("stdout")
                .args(["-l", language.as_str()])
                .run()?;
            let text = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if text.is_empty() {
                return Err(OperationError::failed(
                    "No text could be extracted from the image.",
                ));
            }
            ensure_parent(output)?;
            std::fs::write(output, text)
                .map_err(|e| OperationError::io(format!("write {}", output.display()), e))?;
            Ok(output.to_path_buf())
        };
        run().map_err(|e| failed("OCR", e))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn open(path: &Path) -> Result<DynamicImage, OperationError> {
    ::image::open(path).map_err(|e| OperationError::image(format!("open {}", path.display()), e))
}

/// Composite onto white and drop alpha.
pub fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        let alpha = a as u16;
        let blend = |c: u8| ((c as u16 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        out.put_pixel(x, y, ::image::Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}

/// Write `img` as JPEG at `quality`.
pub fn save_jpeg(img: &DynamicImage, output: &Path, quality: u8) -> Result<(), OperationError> {
    ensure_parent(output)?;
    let rgb = flatten_onto_white(img);
    let file = File::create(output)
        .map_err(|e| OperationError::io(format!("create {}", output.display()), e))?;
    let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), quality);
    encoder
        .encode_image(&rgb)
        .map_err(|e| OperationError::image("JPEG encode", e))
}

fn apply_filter(img: &DynamicImage, filter: ImageFilter) -> DynamicImage {
    match filter {
        ImageFilter::Blur => img.blur(2.0),
        ImageFilter::Sharpen => {
            img.filter3x3(&[-2.0, -2.0, -2.0, -2.0, 32.0, -2.0, -2.0, -2.0, -2.0])
        }
        ImageFilter::Smooth => img.filter3x3(&[1.0, 1.0, 1.0, 1.0, 5.0, 1.0, 1.0, 1.0, 1.0]),
        ImageFilter::Grayscale => img.grayscale(),
        ImageFilter::Enhance => img.unsharpen(1.0, 2).adjust_contrast(10.0),
    }
}

/// Counter-clockwise quarter turns (0–3) for `angle`, which must be a
/// multiple of 90.
fn quarter_turns(angle: i64) -> Result<u8, OperationError> {
    if angle % 90 != 0 {
        return Err(OperationError::invalid_parameter(
            "angle",
            format!("{angle} is not a multiple of 90"),
        ));
    }
    Ok((angle / 90).rem_euclid(4) as u8)
}

/// Largest rectangle with the image's aspect ratio that fits in
/// `scale`×page, centred. Returns (x, y, width, height).
fn fit_centered(img_w: f32, img_h: f32, page_w: f32, page_h: f32, scale: f32) -> (f32, f32, f32, f32) {
    let factor = (page_w / img_w).min(page_h / img_h) * scale;
    let (w, h) = (img_w * factor, img_h * factor);
    ((page_w - w) / 2.0, (page_h - h) / 2.0, w, h)
}

/// Otsu threshold of a grayscale histogram.
pub fn otsu_threshold(img: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for px in img.pixels() {
        histogram[px.0[0] as usize] += 1;
    }
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 127;
    }
    let sum_all: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    let (mut weight_bg, mut sum_bg) = (0u64, 0f64);
    let (mut best, mut best_var) = (0u8, -1f64);
    for (t, &count) in histogram.iter().enumerate() {
        weight_bg += count;
        if weight_bg == 0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0 {
            break;
        }
        sum_bg += t as f64 * count as f64;
        let mean_bg = sum_bg / weight_bg as f64;
        let mean_fg = (sum_all - sum_bg) / weight_fg as f64;
        let between = weight_bg as f64 * weight_fg as f64 * (mean_bg - mean_fg).powi(2);
        if between > best_var {
            best_var = between;
            best = t as u8;
        }
    }
    best
}

fn binarize(img: &GrayImage) -> GrayImage {
    let threshold = otsu_threshold(img);
    let mut out = img.clone();
    for px in out.pixels_mut() {
        *px = Luma([if px.0[0] > threshold { 255 } else { 0 }]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::image::{GenericImageView, Rgba, RgbaImage};
    use tempfile::TempDir;

    fn converter() -> ImageConverter {
        ImageConverter::new(PdfiumBinding::default(), "tesseract".into(), "eng".into())
    }

    fn sample(dir: &TempDir, name: &str, w: u32, h: u32) -> PathBuf {
        let path = dir.path().join(name);
        let img = RgbaImage::from_fn(w, h, |x, y| {
            Rgba([(x * 7 % 256) as u8, (y * 5 % 256) as u8, 128, if x < w / 2 { 255 } else { 0 }])
        });
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn resize_keeps_aspect_and_never_enlarges() {
        let dir = TempDir::new().unwrap();
        let input = sample(&dir, "wide.png", 400, 200);
        let out = dir.path().join("wide_resized.jpg");

        let params = Parameters::new().with("width", "100").with("height", "100");
        converter().resize(&input, &out, &params).unwrap();
        assert_eq!(::image::open(&out).unwrap().dimensions(), (100, 50));

        let params = Parameters::new().with("width", "1000").with("height", "1000");
        converter().resize(&input, &out, &params).unwrap();
        assert_eq!(::image::open(&out).unwrap().dimensions(), (400, 200));
    }

    #[test]
    fn resize_exact_when_aspect_not_kept() {
        let dir = TempDir::new().unwrap();
        let input = sample(&dir, "a.png", 40, 20);
        let out = dir.path().join("a_resized.jpg");
        let params = Parameters::new()
            .with("width", "30")
            .with("height", "30")
            .with("maintain_aspect", "false");
        converter().resize(&input, &out, &params).unwrap();
        assert_eq!(::image::open(&out).unwrap().dimensions(), (30, 30));
    }

    #[test]
    fn rotate_counter_clockwise_expands_canvas() {
        let dir = TempDir::new().unwrap();
        let input = sample(&dir, "r.png", 30, 10);
        let out = dir.path().join("r_rotated.jpg");
        converter()
            .rotate(&input, &out, &Parameters::new().with("rotate_angle", "90"))
            .unwrap();
        assert_eq!(::image::open(&out).unwrap().dimensions(), (10, 30));

        let err = converter()
            .rotate(&input, &out, &Parameters::new().with("angle", "45"))
            .unwrap_err();
        assert!(matches!(err, OperationError::InvalidParameter { .. }));
    }

    #[test]
    fn quarter_turn_normalisation() {
        assert_eq!(quarter_turns(0).unwrap(), 0);
        assert_eq!(quarter_turns(90).unwrap(), 1);
        assert_eq!(quarter_turns(-90).unwrap(), 3);
        assert_eq!(quarter_turns(450).unwrap(), 1);
        assert!(quarter_turns(30).is_err());
    }

    #[test]
    fn format_conversion_follows_output_extension() {
        let dir = TempDir::new().unwrap();
        let input = sample(&dir, "f.png", 16, 16);
        for ext in ["jpg", "bmp", "gif", "tiff", "png"] {
            let out = dir.path().join(format!("f_out.{ext}"));
            converter().convert_format(&input, &out).unwrap();
            let expected = ImageFormat::from_extension(ext).unwrap();
            let got = ::image::ImageReader::open(&out)
                .unwrap()
                .with_guessed_format()
                .unwrap()
                .format();
            assert_eq!(got, Some(expected), "{ext}");
        }
    }

    #[test]
    fn compress_rejects_out_of_range_quality() {
        let dir = TempDir::new().unwrap();
        let input = sample(&dir, "c.png", 8, 8);
        let out = dir.path().join("c_compressed.jpg");
        let err = converter()
            .compress(&input, &out, &Parameters::new().with("quality", "0"))
            .unwrap_err();
        assert!(err.to_string().contains("quality"));
        converter()
            .compress(&input, &out, &Parameters::new().with("quality", "40"))
            .unwrap();
        assert!(out.metadata().unwrap().len() > 0);
    }

    #[test]
    fn every_filter_writes_a_jpeg() {
        let dir = TempDir::new().unwrap();
        let input = sample(&dir, "flt.png", 12, 12);
        for name in ["blur", "sharpen", "smooth", "grayscale", "enhance"] {
            let out = dir.path().join(format!("flt_{name}.jpg"));
            converter()
                .filter(&input, &out, &Parameters::new().with("filter_type", name))
                .unwrap();
            assert_eq!(::image::open(&out).unwrap().dimensions(), (12, 12));
        }
        let err = converter()
            .filter(&input, &dir.path().join("x.jpg"), &Parameters::new().with("filter_type", "sepia"))
            .unwrap_err();
        assert!(err.to_string().contains("sepia"));
    }

    #[test]
    fn ocr_language_outside_supported_set_is_rejected() {
        let dir = TempDir::new().unwrap();
        let input = sample(&dir, "ocr.png", 8, 8);
        let out = dir.path().join("ocr.txt");
        let err = converter()
            .to_text(&input, &out, &Parameters::new().with("ocr_language", "eng+osd -c x"))
            .unwrap_err();
        assert!(
            matches!(err, OperationError::InvalidParameter { ref name, .. } if name == "ocr_language"),
            "{err:?}"
        );
        assert!(!out.exists());
    }

    #[test]
    fn transparent_pixels_become_white() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0])));
        assert_eq!(flatten_onto_white(&img).get_pixel(0, 0).0, [255, 255, 255]);
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([10, 20, 30, 255])));
        assert_eq!(flatten_onto_white(&img).get_pixel(0, 0).0, [10, 20, 30]);
    }

    #[test]
    fn otsu_separates_two_levels() {
        let img = GrayImage::from_fn(10, 10, |x, _| Luma([if x < 5 { 30 } else { 220 }]));
        let t = otsu_threshold(&img);
        assert!((30..220).contains(&t), "threshold {t}");
        let bin = binarize(&img);
        assert_eq!(bin.get_pixel(0, 0).0[0], 0);
        assert_eq!(bin.get_pixel(9, 0).0[0], 255);
    }

    #[test]
    fn fit_centered_on_a4() {
        let (x, y, w, h) = fit_centered(100.0, 100.0, 595.0, 842.0, 0.8);
        assert!((w - 476.0).abs() < 0.01);
        assert!((h - 476.0).abs() < 0.01);
        assert!((x - 59.5).abs() < 0.01);
        assert!((y - 183.0).abs() < 0.01);
    }

    #[test]
    fn corrupt_input_reports_operation_name() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("bad.png");
        std::fs::write(&input, b"not an image").unwrap();
        let err = converter()
            .compress(&input, &dir.path().join("o.jpg"), &Parameters::new())
            .unwrap_err();
        assert!(err.to_string().starts_with("Image compression failed"), "got: {err}");
    }
}
