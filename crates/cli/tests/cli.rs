use assert_cmd::Command;
use lopdf::content::Content;
use lopdf::{dictionary, Document, Object, Stream};
use planmark_core::geometry::PagePoint;
use planmark_core::links::{MeasurementInput, MeasurementKind, MeasurementLinkGraph};
use planmark_core::markup::{Markup, MarkupShape, MarkupStyle};
use planmark_storage::{save_project, ProjectDocument, ProjectFile};
use predicates::prelude::*;
use std::path::Path;
use uuid::Uuid;

fn single_page_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let content = Content { operations: Vec::new() };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().expect("content encodes"),
    ));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Contents" => content_id,
    });

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("document saves");
    bytes
}

fn sample_project(dir: &Path) -> std::path::PathBuf {
    let mut project = ProjectFile::new("site-a");
    let mut document = ProjectDocument::new(Uuid::new_v4(), "plans.pdf", &single_page_pdf(), 1);

    let markup = Markup::new(
        1,
        MarkupShape::CountMarker { position: PagePoint::new(120.0, 140.0), number: 1 },
        MarkupStyle::new(),
    );

    let product = project.products.add_root("Fixtures", "ea");
    let mut graph = MeasurementLinkGraph::new();
    graph.link(
        product,
        MeasurementInput {
            markup_id: markup.id,
            document_id: document.id,
            page: 1,
            kind: MeasurementKind::Count,
            value: 1.0,
            unit: "ea".into(),
            group_id: None,
            group_label: None,
        },
    );

    document.measurements = graph.records().into_iter().cloned().collect();
    document.markups.push(markup);
    project.documents.push(document);

    let path = dir.join("site-a.planmark.json");
    save_project(&path, &project).expect("project saves");
    path
}

#[test]
fn version_prints_semver() {
    Command::cargo_bin("planmark-cli")
        .unwrap()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^\d+\.\d+\.\d+").unwrap());
}

#[test]
fn info_reports_page_geometry() {
    let temp = tempfile::tempdir().unwrap();
    let pdf_path = temp.path().join("plan.pdf");
    std::fs::write(&pdf_path, single_page_pdf()).unwrap();

    Command::cargo_bin("planmark-cli")
        .unwrap()
        .arg("info")
        .arg(&pdf_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"page_count\": 1"))
        .stdout(predicate::str::contains("612"));
}

#[test]
fn info_on_missing_file_fails() {
    Command::cargo_bin("planmark-cli")
        .unwrap()
        .arg("info")
        .arg("/no/such/file.pdf")
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn export_writes_marked_document() {
    let temp = tempfile::tempdir().unwrap();
    let project_path = sample_project(temp.path());
    let out_dir = temp.path().join("out");

    Command::cargo_bin("planmark-cli")
        .unwrap()
        .arg("export")
        .arg(&project_path)
        .arg("--output-dir")
        .arg(&out_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("plans-marked.pdf"));

    let baked = std::fs::read(out_dir.join("plans-marked.pdf")).unwrap();
    assert!(baked.starts_with(b"%PDF"));
}

#[test]
fn report_emits_link_events() {
    let temp = tempfile::tempdir().unwrap();
    let project_path = sample_project(temp.path());

    Command::cargo_bin("planmark-cli")
        .unwrap()
        .arg("report")
        .arg(&project_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("product_id"))
        .stdout(predicate::str::contains("count"))
        .stdout(predicate::str::contains("ea"));
}
