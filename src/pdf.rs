use std::collections::BTreeMap;
use std::io::BufWriter;
use std::mem;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Object, ObjectId, Stream};

use crate::error::{ContextError, ErrorKind};
use crate::font::resolve;
use crate::model::Rectangle;
use crate::standard_font::{self, FIRST_CHAR, LAST_CHAR};
use crate::text_layer::page_size;

/// One layer of PDF data drawn over a page. It can be converted into a `lopdf::Stream` by calling `into_stream`.
#[derive(Debug, Clone, Default)]
pub struct PdfLayer {
    /// Operations of this layer, in drawing order.
    pub(crate) operations: Vec<Operation>,
}

impl PdfLayer {
    /// Encodes the layer into an uncompressed content stream. The layer restores the graphics state
    /// saved before the original page content, so that it draws in the untransformed page space.
    pub fn into_stream(self) -> Result<Stream, ContextError> {
        let mut operations = vec![Operation::new("Q", vec![]), Operation::new("q", vec![])];
        operations.extend(self.operations);
        operations.push(Operation::new("Q", vec![]));

        // Construct the stream content from the actual underlying operations of the layer
        let stream_content = Content { operations }.encode().map_err(|error| {
            ContextError::with_error(
                ErrorKind::Rendering,
                "Failed to encode the overlay content",
                &error,
            )
        })?;

        // Page contents should not be compressed
        Ok(Stream::new(Dictionary::new(), stream_content).with_compression(false))
    }
}

/// The decoded pixels of an image, split into colour and alpha planes as PDF image XObjects expect them.
#[derive(Debug, Clone)]
pub struct ImageXObject {
    pub width: u32,
    pub height: u32,
    /// 8-bit RGB samples.
    pub image_data: Vec<u8>,
    /// 8-bit alpha samples, drawn as a `DeviceGray` soft mask.
    pub soft_mask: Vec<u8>,
}

impl ImageXObject {
    /// Decodes PNG or JPEG bytes.
    pub fn decode(bytes: &[u8]) -> Result<ImageXObject, image::ImageError> {
        let image = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = image.dimensions();

        let mut image_data = Vec::with_capacity((width * height * 3) as usize);
        let mut soft_mask = Vec::with_capacity((width * height) as usize);
        for pixel in image.pixels() {
            image_data.extend_from_slice(&pixel.0[..3]);
            soft_mask.push(pixel.0[3]);
        }

        Ok(ImageXObject {
            width,
            height,
            image_data,
            soft_mask,
        })
    }

    /// Inserts the image and its soft mask into the document, returning the image object.
    fn insert_into_document(self, inner_document: &mut lopdf::Document) -> ObjectId {
        let soft_mask = inner_document.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => self.width as i64,
                "Height" => self.height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            self.soft_mask,
        ));

        inner_document.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => self.width as i64,
                "Height" => self.height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "SMask" => soft_mask,
            },
            self.image_data,
        ))
    }
}

/// The overlay state of one page: what to draw and which resources it needs.
#[derive(Debug, Default)]
struct PageOverlay {
    layer: PdfLayer,
    uses_font: bool,
    images: Vec<(String, ObjectId)>,
}

/// An existing PDF document that text and images are drawn over, page by page.
pub struct OverlayDocument {
    inner_document: lopdf::Document,
    pages: BTreeMap<u32, ObjectId>,
    overlays: BTreeMap<u32, PageOverlay>,
    font: Option<ObjectId>,
    /// The resource name of the overlay font, unused by every page of the template.
    font_resource: String,
    image_count: usize,
}

impl OverlayDocument {
    /// Opens a template for drawing.
    pub fn load(bytes: &[u8]) -> Result<OverlayDocument, ContextError> {
        let inner_document = lopdf::Document::load_mem(bytes).map_err(|error| {
            ContextError::with_error(ErrorKind::UnreadablePdf, "Unable to open the template", &error)
        })?;
        let pages = inner_document.get_pages();

        let mut overlay_document = OverlayDocument {
            inner_document,
            pages,
            overlays: BTreeMap::new(),
            font: None,
            font_resource: String::new(),
            image_count: 0,
        };
        overlay_document.font_resource = overlay_document.unused_font_resource();

        Ok(overlay_document)
    }

    pub fn num_pages(&self) -> u32 {
        self.pages.len() as u32
    }

    /// The width and height of a 1-based page, if the document has it.
    pub fn page_size(&self, page: u32) -> Option<(f64, f64)> {
        let page_id = self.pages.get(&page)?;
        Some(page_size(&self.inner_document, *page_id))
    }

    /// Restricts everything drawn until the matching `end_clip` to the rectangle.
    pub fn begin_clip(&mut self, page: u32, rectangle: &Rectangle) {
        let layer = &mut self.overlay(page).layer;
        layer.operations.extend([
            Operation::new("q", vec![]),
            Operation::new(
                "re",
                vec![
                    real(rectangle.x0),
                    real(rectangle.y0),
                    real(rectangle.width()),
                    real(rectangle.height()),
                ],
            ),
            Operation::new("W", vec![]),
            Operation::new("n", vec![]),
        ]);
    }

    pub fn end_clip(&mut self, page: u32) {
        self.overlay(page)
            .layer
            .operations
            .push(Operation::new("Q", vec![]));
    }

    /// Writes one line of Helvetica text with its baseline starting at `caret_position`.
    /// Characters outside of `WinAnsiEncoding` are dropped.
    pub fn write_text_to_page(
        &mut self,
        page: u32,
        color: [f32; 3],
        text: &str,
        font_size: f64,
        caret_position: [f64; 2],
    ) {
        let font_resource = self.font_resource.clone().into_bytes();
        let overlay = self.overlay(page);
        overlay.uses_font = true;
        let [x, y] = caret_position;
        let [r, g, b] = color;

        overlay.layer.operations.extend([
            // Begin text section
            Operation::new("BT", vec![]),
            // Set the font and the font size
            Operation::new("Tf", vec![Object::Name(font_resource), real(font_size)]),
            // Set the position where the text begins to be written
            Operation::new("Td", vec![real(x), real(y)]),
            // Set the filling color of the text
            Operation::new("rg", vec![Object::Real(r), Object::Real(g), Object::Real(b)]),
            Operation::new(
                "Tj",
                vec![Object::String(
                    standard_font::encode_text(text),
                    lopdf::StringFormat::Literal,
                )],
            ),
            Operation::new("ET", vec![]),
        ]);
    }

    /// Draws an image stretched over the rectangle.
    pub fn draw_image(&mut self, page: u32, image: ImageXObject, rectangle: &Rectangle) {
        let image_id = image.insert_into_document(&mut self.inner_document);
        let name = format!("ImFill{}", self.image_count);
        self.image_count += 1;

        let overlay = self.overlay(page);
        overlay.images.push((name.clone(), image_id));
        overlay.layer.operations.extend([
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    real(rectangle.width()),
                    Object::Integer(0),
                    Object::Integer(0),
                    real(rectangle.height()),
                    real(rectangle.x0),
                    real(rectangle.y0),
                ],
            ),
            Operation::new("Do", vec![Object::Name(name.into_bytes())]),
            Operation::new("Q", vec![]),
        ]);
    }

    /// Attaches every overlay to its page and serializes the document.
    pub fn save_to_bytes(mut self) -> Result<Vec<u8>, ContextError> {
        let overlays = mem::take(&mut self.overlays);
        for (page, overlay) in overlays {
            self.attach_overlay(page, overlay)?;
        }

        let mut pdf_document_bytes = Vec::new();
        let mut writer = BufWriter::new(&mut pdf_document_bytes);
        self.inner_document.save_to(&mut writer).map_err(|error| {
            ContextError::with_error(
                ErrorKind::Rendering,
                "Error while saving the PDF document to bytes",
                &error,
            )
        })?;
        mem::drop(writer);

        Ok(pdf_document_bytes)
    }

    fn overlay(&mut self, page: u32) -> &mut PageOverlay {
        self.overlays.entry(page).or_default()
    }

    /// The Helvetica font dictionary, with its widths embedded so that readers measure the text
    /// exactly as it was laid out.
    fn font(&mut self) -> ObjectId {
        if let Some(font) = self.font {
            return font;
        }
        let widths: Vec<Object> = standard_font::win_ansi_widths()
            .into_iter()
            .map(|width| Object::Integer(width as i64))
            .collect();
        let font = self.inner_document.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
            "FirstChar" => FIRST_CHAR as i64,
            "LastChar" => LAST_CHAR as i64,
            "Widths" => widths,
        });
        self.font = Some(font);

        font
    }

    fn attach_overlay(&mut self, page: u32, overlay: PageOverlay) -> Result<(), ContextError> {
        let page_id = *self.pages.get(&page).ok_or(ContextError::with_context(
            ErrorKind::Rendering,
            format!("Failed to find the page {}", page),
        ))?;

        // The page receives its own copy of the resources it inherits, extended with the overlay ones
        let mut resources = self.effective_resources(page_id);
        if overlay.uses_font {
            let font = self.font();
            let mut fonts = self.sub_dictionary(&resources, b"Font");
            fonts.set(self.font_resource.clone(), font);
            resources.set("Font", fonts);
        }
        if !overlay.images.is_empty() {
            let mut xobjects = self.sub_dictionary(&resources, b"XObject");
            for (name, image_id) in &overlay.images {
                xobjects.set(name.clone(), *image_id);
            }
            resources.set("XObject", xobjects);
        }

        let save_state = self.inner_document.add_object(
            Stream::new(Dictionary::new(), b"q\n".to_vec()).with_compression(false),
        );
        let overlay_stream = self
            .inner_document
            .add_object(overlay.layer.into_stream()?);

        let mut contents = vec![Object::Reference(save_state)];
        contents.extend(self.existing_contents(page_id));
        contents.push(Object::Reference(overlay_stream));

        let page_dictionary = self
            .inner_document
            .get_object_mut(page_id)
            .and_then(|page| page.as_dict_mut())
            .map_err(|error| {
                ContextError::with_error(
                    ErrorKind::Rendering,
                    format!("Failed to access the page {}", page),
                    &error,
                )
            })?;
        page_dictionary.set("Resources", resources);
        page_dictionary.set("Contents", contents);

        Ok(())
    }

    /// The first `FFill{n}` name no page of the document uses for a font of its own.
    fn unused_font_resource(&self) -> String {
        let mut used = std::collections::HashSet::new();
        for page_id in self.pages.values() {
            let resources = self.effective_resources(*page_id);
            for (name, _) in self.sub_dictionary(&resources, b"Font").iter() {
                used.insert(name.clone());
            }
        }

        (0..)
            .map(|index| format!("FFill{index}"))
            .find(|name| !used.contains(name.as_bytes()))
            .unwrap_or_default()
    }

    /// The resources of the page, inherited through the page tree, as a standalone dictionary.
    fn effective_resources(&self, page_id: ObjectId) -> Dictionary {
        let document = &self.inner_document;
        let mut current = Some(page_id);
        for _ in 0..64 {
            let Some(dictionary) = current
                .and_then(|id| document.get_object(id).ok())
                .and_then(|object| object.as_dict().ok())
            else {
                break;
            };
            if let Ok(resources) = dictionary.get(b"Resources") {
                if let Object::Dictionary(resources) = resolve(document, resources) {
                    return resources.clone();
                }
            }
            current = dictionary
                .get(b"Parent")
                .and_then(|parent| parent.as_reference())
                .ok();
        }

        Dictionary::new()
    }

    /// A copy of a resource category, resolving it when it is stored indirectly.
    fn sub_dictionary(&self, resources: &Dictionary, key: &[u8]) -> Dictionary {
        match resources
            .get(key)
            .map(|object| resolve(&self.inner_document, object))
        {
            Ok(Object::Dictionary(dictionary)) => dictionary.clone(),
            _ => Dictionary::new(),
        }
    }

    /// The references of the current content streams of the page.
    fn existing_contents(&mut self, page_id: ObjectId) -> Vec<Object> {
        let contents = self
            .inner_document
            .get_object(page_id)
            .and_then(|page| page.as_dict())
            .and_then(|page| page.get(b"Contents"))
            .cloned();

        match contents {
            Ok(Object::Reference(id)) => match self.inner_document.get_object(id) {
                Ok(Object::Array(references)) => references.clone(),
                _ => vec![Object::Reference(id)],
            },
            Ok(Object::Array(references)) => references,
            Ok(Object::Stream(stream)) => vec![Object::Reference(self.inner_document.add_object(stream))],
            _ => Vec::new(),
        }
    }
}

fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text_layer::PageText;

    fn blank_page_document() -> Vec<u8> {
        let mut document = lopdf::Document::with_version("1.5");
        let pages_id = document.new_object_id();
        let content_id = document.add_object(Stream::new(
            dictionary! {},
            b"2 0 0 2 0 0 cm".to_vec(),
        ));
        let page_id = document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        document.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(595),
                    Object::Integer(842),
                ],
                "Resources" => dictionary! {},
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

    #[test]
    fn overlays_draw_in_the_untransformed_page_space() {
        let mut overlay = OverlayDocument::load(&blank_page_document()).unwrap();
        assert_eq!(overlay.num_pages(), 1);
        assert_eq!(overlay.page_size(1), Some((595.0, 842.0)));
        assert_eq!(overlay.page_size(2), None);

        overlay.write_text_to_page(1, [0.0, 0.0, 0.0], "Hello", 10.0, [100.0, 500.0]);
        let bytes = overlay.save_to_bytes().unwrap();

        let document = lopdf::Document::load_mem(&bytes).unwrap();
        let page_id = *document.get_pages().get(&1).unwrap();
        let page = PageText::read(&document, page_id);
        assert_eq!(page.text_in(&Rectangle::new(90.0, 490.0, 200.0, 520.0)), "Hello");
    }

    #[test]
    fn layers_restore_the_saved_state_first() {
        let layer = PdfLayer {
            operations: vec![Operation::new("n", vec![])],
        };

        let stream = layer.into_stream().unwrap();
        let operators: Vec<String> = Content::decode(&stream.content)
            .unwrap()
            .operations
            .into_iter()
            .map(|operation| operation.operator)
            .collect();
        assert_eq!(operators, vec!["Q", "q", "n", "Q"]);
    }
}
