#![allow(dead_code)]

use std::io::Cursor;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

/// One run of text drawn in Helvetica with its baseline starting at `(x, baseline)`.
pub struct Placement<'a> {
    pub text: &'a str,
    pub x: f64,
    pub baseline: f64,
    pub font_size: f64,
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A document of `pages` pages of the given size, each drawing its placements. The font and the
/// page size are declared on the page tree root, so that pages inherit them.
pub fn document_with_text(width: f64, height: f64, pages: &[Vec<Placement>]) -> Vec<u8> {
    document_with_media_box([0.0, 0.0, width, height], pages)
}

/// Like `document_with_text`, with an explicit `MediaBox` whose corner may be off the origin.
pub fn document_with_media_box(media_box: [f64; 4], pages: &[Vec<Placement>]) -> Vec<u8> {
    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();
    let font_id = document.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut kids = Vec::new();
    for placements in pages {
        let mut operations = Vec::new();
        for placement in placements {
            operations.extend([
                Operation::new("BT", vec![]),
                Operation::new(
                    "Tf",
                    vec!["F1".into(), Object::Real(placement.font_size as f32)],
                ),
                Operation::new(
                    "Td",
                    vec![
                        Object::Real(placement.x as f32),
                        Object::Real(placement.baseline as f32),
                    ],
                ),
                Operation::new("Tj", vec![Object::string_literal(placement.text)]),
                Operation::new("ET", vec![]),
            ]);
        }
        let content = Content { operations }.encode().unwrap();
        let content_id = document.add_object(Stream::new(dictionary! {}, content));
        let page_id = document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => media_box
                .iter()
                .map(|corner| Object::Real(*corner as f32))
                .collect::<Vec<_>>(),
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    document.save_to(&mut bytes).unwrap();
    bytes
}

/// An A4 template whose pages carry a title line near the top and nothing else.
pub fn blank_template(pages: usize) -> Vec<u8> {
    let pages: Vec<Vec<Placement>> = (0..pages)
        .map(|_| {
            vec![Placement {
                text: "DAMAGE REPORT",
                x: 40.0,
                baseline: 800.0,
                font_size: 14.0,
            }]
        })
        .collect();

    document_with_text(595.0, 842.0, &pages)
}

/// A small opaque PNG.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 30, 30, 255]));
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}
