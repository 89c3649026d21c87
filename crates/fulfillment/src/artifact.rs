//! Print artifact generation.
//!
//! The artwork is decoded, flattened onto white and embedded as a single
//! image on a one-page PDF sized to the cup's print sheet including bleed.
//! The image is scaled to cover the whole page and centred; overflow is
//! cropped by the page box.

use std::io::Write;
use std::time::Instant;

use bytes::Bytes;
use common::{CupType, OrderId, PrintSpec};
use flate2::Compression;
use flate2::write::ZlibEncoder;
use lopdf::{Document, Object, Stream, dictionary};

use crate::error::GenerationError;
use crate::services::{Bucket, SharedObjectStorage};

/// PDF points per millimetre.
pub const POINTS_PER_MM: f64 = 72.0 / 25.4;

pub const ARTIFACT_CONTENT_TYPE: &str = "application/pdf";

/// Deterministic artifact location; regeneration overwrites it in place.
pub fn artifact_path(order_id: &OrderId) -> String {
    format!("{order_id}/print.pdf")
}

/// Page size in points for a print specification.
pub fn page_size_points(spec: &PrintSpec) -> (f64, f64) {
    (
        spec.sheet_width_mm() * POINTS_PER_MM,
        spec.sheet_height_mm() * POINTS_PER_MM,
    )
}

/// Placement of the artwork on the page, in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Scales an image to cover the page entirely, centred.
pub fn cover_placement(page: (f64, f64), image: (u32, u32)) -> Placement {
    let (page_w, page_h) = page;
    let (img_w, img_h) = (f64::from(image.0.max(1)), f64::from(image.1.max(1)));
    let scale = (page_w / img_w).max(page_h / img_h);
    let width = img_w * scale;
    let height = img_h * scale;
    Placement {
        x: (page_w - width) / 2.0,
        y: (page_h - height) / 2.0,
        width,
        height,
    }
}

/// Decodes artwork bytes into an RGB raster flattened onto white.
fn decode_artwork(artwork: &[u8]) -> Result<image::RgbImage, GenerationError> {
    let decoded =
        image::load_from_memory(artwork).map_err(|e| GenerationError::Decode(e.to_string()))?;
    let rgba = decoded.to_rgba8();

    let mut rgb = image::RgbImage::new(rgba.width(), rgba.height());
    for (src, dst) in rgba.pixels().zip(rgb.pixels_mut()) {
        let [r, g, b, a] = src.0;
        let alpha = u16::from(a);
        let over_white = |c: u8| ((u16::from(c) * alpha + 255 * (255 - alpha)) / 255) as u8;
        dst.0 = [over_white(r), over_white(g), over_white(b)];
    }
    Ok(rgb)
}

/// Builds the print PDF for `artwork` on a `cup_type` sheet.
///
/// CPU-bound; call from a blocking context.
pub fn compose_pdf(artwork: &[u8], cup_type: CupType) -> Result<Vec<u8>, GenerationError> {
    let raster = decode_artwork(artwork)?;
    let (img_w, img_h) = raster.dimensions();

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(raster.as_raw())
        .map_err(|e| GenerationError::Render(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| GenerationError::Render(e.to_string()))?;

    let page = page_size_points(&cup_type.print_spec());
    let placement = cover_placement(page, (img_w, img_h));

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => Object::Integer(i64::from(img_w)),
            "Height" => Object::Integer(i64::from(img_h)),
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => Object::Integer(8),
            "Filter" => "FlateDecode",
        },
        compressed,
    ));

    let content = format!(
        "q\n{:.4} 0 0 {:.4} {:.4} {:.4} cm\n/Im0 Do\nQ\n",
        placement.width, placement.height, placement.x, placement.y
    );
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

    let resources_id = doc.add_object(dictionary! {
        "XObject" => dictionary! {
            "Im0" => image_id,
        },
    });

    let media_box = vec![
        Object::Integer(0),
        Object::Integer(0),
        Object::Real(page.0 as f32),
        Object::Real(page.1 as f32),
    ];
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => media_box,
        "TrimBox" => trim_box(&cup_type.print_spec()),
        "Contents" => content_id,
        "Resources" => resources_id,
    });

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => Object::Integer(1),
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut output = Vec::new();
    doc.save_to(&mut output)
        .map_err(|e| GenerationError::Render(e.to_string()))?;
    Ok(output)
}

/// The finished print area, inset from the page by the bleed.
fn trim_box(spec: &PrintSpec) -> Vec<Object> {
    let bleed = spec.bleed_mm * POINTS_PER_MM;
    let (page_w, page_h) = page_size_points(spec);
    vec![
        Object::Real(bleed as f32),
        Object::Real(bleed as f32),
        Object::Real((page_w - bleed) as f32),
        Object::Real((page_h - bleed) as f32),
    ]
}

/// Produces print artifacts from stored artwork.
#[derive(Clone)]
pub struct ArtifactGenerator {
    storage: SharedObjectStorage,
}

impl ArtifactGenerator {
    pub fn new(storage: SharedObjectStorage) -> Self {
        Self { storage }
    }

    /// Downloads the artwork, renders the PDF and uploads it.
    ///
    /// Returns the artifact reference. Writes nothing to the order store.
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn generate(
        &self,
        order_id: &OrderId,
        artwork_ref: &str,
        cup_type: CupType,
    ) -> Result<String, GenerationError> {
        let started = Instant::now();

        let artwork: Bytes = self
            .storage
            .download(Bucket::Artwork, artwork_ref)
            .await
            .map_err(|e| GenerationError::Download(e.to_string()))?;

        let pdf = tokio::task::spawn_blocking(move || compose_pdf(&artwork, cup_type))
            .await
            .map_err(|e| GenerationError::Render(e.to_string()))??;

        let path = artifact_path(order_id);
        self.storage
            .upload(
                Bucket::Artifacts,
                &path,
                Bytes::from(pdf),
                ARTIFACT_CONTENT_TYPE,
            )
            .await
            .map_err(|e| GenerationError::Upload(e.to_string()))?;

        metrics::histogram!("artifact_generation_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(path = %path, cup_type = %cup_type, "print artifact stored");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::services::InMemoryObjectStorage;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 30, 30, 255]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_page_size_includes_bleed() {
        let spec = CupType::Hotzy.print_spec();
        let (w, h) = page_size_points(&spec);
        let expected_w = (spec.width_mm + 2.0 * spec.bleed_mm) * 72.0 / 25.4;
        let expected_h = (spec.height_mm + 2.0 * spec.bleed_mm) * 72.0 / 25.4;
        assert!((w - expected_w).abs() < 1e-9);
        assert!((h - expected_h).abs() < 1e-9);
    }

    #[test]
    fn test_cover_placement_fills_page() {
        // Wide image on a less-wide page: height drives the scale.
        let placement = cover_placement((200.0, 100.0), (400, 100));
        assert!((placement.height - 100.0).abs() < 1e-9);
        assert!((placement.width - 400.0).abs() < 1e-9);
        assert!((placement.x + 100.0).abs() < 1e-9);
        assert!(placement.y.abs() < 1e-9);

        // Tall image: width drives the scale.
        let placement = cover_placement((200.0, 100.0), (100, 200));
        assert!((placement.width - 200.0).abs() < 1e-9);
        assert!(placement.height >= 100.0);
    }

    #[test]
    fn test_compose_produces_single_page_pdf() {
        let pdf = compose_pdf(&png_bytes(40, 20), CupType::Classic).unwrap();
        assert!(pdf.starts_with(b"%PDF-1.5"));

        let doc = Document::load_mem(&pdf).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn test_compose_rejects_non_image() {
        let result = compose_pdf(b"definitely not an image", CupType::Classic);
        assert!(matches!(result, Err(GenerationError::Decode(_))));
    }

    #[tokio::test]
    async fn test_generate_uploads_to_deterministic_path() {
        let storage = InMemoryObjectStorage::new();
        storage.put(Bucket::Artwork, "o1/wrap.png", png_bytes(10, 10), "image/png");
        let generator = ArtifactGenerator::new(Arc::new(storage.clone()));
        let order_id = OrderId::parse("o1").unwrap();

        let path = generator
            .generate(&order_id, "o1/wrap.png", CupType::Hotzy)
            .await
            .unwrap();
        assert_eq!(path, "o1/print.pdf");
        assert_eq!(
            storage.content_type(Bucket::Artifacts, "o1/print.pdf").as_deref(),
            Some("application/pdf")
        );

        // Second run overwrites rather than accumulating.
        generator
            .generate(&order_id, "o1/wrap.png", CupType::Hotzy)
            .await
            .unwrap();
        assert_eq!(storage.object_count(Bucket::Artifacts), 1);
        assert_eq!(storage.upload_count(Bucket::Artifacts), 2);
    }

    #[tokio::test]
    async fn test_generate_distinct_failure_kinds() {
        let storage = InMemoryObjectStorage::new();
        let generator = ArtifactGenerator::new(Arc::new(storage.clone()));
        let order_id = OrderId::parse("o1").unwrap();

        let missing = generator
            .generate(&order_id, "o1/wrap.png", CupType::Classic)
            .await;
        assert!(matches!(missing, Err(GenerationError::Download(_))));

        storage.put(Bucket::Artwork, "o1/wrap.png", b"garbage".to_vec(), "image/png");
        let corrupt = generator
            .generate(&order_id, "o1/wrap.png", CupType::Classic)
            .await;
        assert!(matches!(corrupt, Err(GenerationError::Decode(_))));

        storage.put(Bucket::Artwork, "o1/wrap.png", png_bytes(4, 4), "image/png");
        storage.set_fail_on_upload(true);
        let upload = generator
            .generate(&order_id, "o1/wrap.png", CupType::Classic)
            .await;
        assert!(matches!(upload, Err(GenerationError::Upload(_))));
        assert_eq!(storage.object_count(Bucket::Artifacts), 0);
    }
}
