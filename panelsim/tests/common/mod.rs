//! Shared fixtures: small PDFs generated in memory with lopdf.

#![allow(dead_code)]

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

/// One positioned line of text
pub type Line<'a> = (i64, i64, &'a str);

/// Build a PDF with one page per entry, each line shown with `Td` + `Tj`.
pub fn build_pdf(pages: &[Vec<Line<'_>>]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for lines in pages {
        let mut operations = Vec::new();
        for &(x, y, text) in lines {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), Object::Integer(10)]));
            operations.push(Operation::new(
                "Td",
                vec![Object::Integer(x), Object::Integer(y)],
            ));
            operations.push(Operation::new("Tj", vec![Object::string_literal(text)]));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content stream"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
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
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("serialize pdf");
    bytes
}

/// Transformer, breaker and two final circuits on one page
pub fn radial_board_pdf() -> Vec<u8> {
    build_pdf(&[vec![
        (50, 760, "T1 230V"),
        (50, 680, "Q1 32A"),
        (50, 600, "Q2 16A"),
        (250, 600, "Q3 16A"),
        (50, 500, "L1 Kitchen 10A"),
        (250, 500, "L2 Lighting 3A"),
        (400, 760, "T1 -> Q1"),
        (400, 740, "Q1 -> Q2"),
        (400, 720, "Q1 -> Q3"),
        (400, 700, "Q2 -> L1 2.5mm2 Cu 15m"),
        (400, 680, "Q3 -> L2 1.5mm2 Cu 20m"),
    ]])
}

/// Same board with an oversized load behind the 16 A breaker
pub fn overloaded_board_pdf() -> Vec<u8> {
    build_pdf(&[vec![
        (50, 760, "T1 230V"),
        (50, 680, "Q1 16A"),
        (50, 500, "L1 Heater 20A"),
        (400, 760, "T1 -> Q1"),
        (400, 740, "Q1 -> L1"),
    ]])
}

/// A document that has text but no recognisable designators
pub fn prose_pdf() -> Vec<u8> {
    build_pdf(&[vec![
        (50, 760, "Quarterly maintenance report"),
        (50, 740, "All panels inspected"),
    ]])
}

/// `count` pages each holding one load
pub fn many_pages_pdf(count: usize) -> Vec<u8> {
    let labels: Vec<String> = (1..=count).map(|i| format!("L{} 1A", i)).collect();
    let pages: Vec<Vec<Line<'_>>> = labels
        .iter()
        .map(|label| vec![(50, 700, label.as_str())])
        .collect();
    build_pdf(&pages)
}
