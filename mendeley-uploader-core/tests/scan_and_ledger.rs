use std::fs;
use std::io::Write;

use chrono::Utc;
use mendeley_uploader_core::ledger::{path_key, Ledger, LedgerRecord, Outcome};
use mendeley_uploader_core::scan::{derive_title, is_pdf, scan_pdfs, sha256_file};
use tempfile::tempdir;
use uuid::Uuid;

fn record(file: &std::path::Path, outcome: Outcome, sha256: Option<&str>) -> LedgerRecord {
    LedgerRecord {
        timestamp: Utc::now(),
        run_id: Uuid::new_v4(),
        file: path_key(file),
        title: derive_title(&file.file_name().unwrap().to_string_lossy()),
        sha256: sha256.map(str::to_string),
        document_id: None,
        outcome,
        error: None,
    }
}

#[test]
fn test_derive_title_replaces_underscores_and_drops_extension() {
    assert_eq!(derive_title("Attention_Is_All_You_Need.pdf"), "Attention Is All You Need");
    assert_eq!(derive_title("plain.pdf"), "plain");
    assert_eq!(derive_title("v1.2_notes.pdf"), "v1.2 notes");
}

#[test]
fn test_is_pdf_ignores_case() {
    assert!(is_pdf(std::path::Path::new("a.pdf")));
    assert!(is_pdf(std::path::Path::new("a.PDF")));
    assert!(!is_pdf(std::path::Path::new("a.pdf.txt")));
    assert!(!is_pdf(std::path::Path::new("pdf")));
}

#[test]
fn test_scan_directory_lists_direct_pdf_children_sorted() {
    let dir = tempdir().unwrap();
    for name in ["zeta.pdf", "alpha.pdf", "Mixed.Pdf", "readme.md", ".hidden.pdf"] {
        fs::write(dir.path().join(name), b"x").unwrap();
    }
    fs::create_dir(dir.path().join("nested")).unwrap();
    fs::write(dir.path().join("nested").join("deep.pdf"), b"x").unwrap();
    fs::create_dir(dir.path().join("folder.pdf")).unwrap();

    let files = scan_pdfs(dir.path()).unwrap();
    let names: Vec<_> = files.iter().map(|f| f.file_name.as_str()).collect();
    assert_eq!(names, vec!["Mixed.Pdf", "alpha.pdf", "zeta.pdf"]);
    assert!(files.iter().all(|f| f.path.is_absolute()));
    assert_eq!(files[1].title, "alpha");
}

#[test]
fn test_scan_single_file_target() {
    let dir = tempdir().unwrap();
    let pdf = dir.path().join("one_paper.pdf");
    let txt = dir.path().join("one.txt");
    fs::write(&pdf, b"x").unwrap();
    fs::write(&txt, b"x").unwrap();

    let files = scan_pdfs(&pdf).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].title, "one paper");

    assert!(scan_pdfs(&txt).unwrap().is_empty());
}

#[test]
fn test_scan_missing_target_is_not_found() {
    let dir = tempdir().unwrap();
    let err = scan_pdfs(&dir.path().join("missing")).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
}

#[test]
fn test_sha256_of_known_content() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("abc.pdf");
    fs::write(&path, b"abc").unwrap();
    assert_eq!(
        sha256_file(&path).unwrap(),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn test_missing_ledger_reads_as_empty() {
    let dir = tempdir().unwrap();
    let ledger = Ledger::new(dir.path().join("nope.jsonl"));
    assert!(ledger.records().unwrap().is_empty());
    let index = ledger.uploaded_index().unwrap();
    assert!(!index.contains(&dir.path().join("a.pdf"), Some("any")));
}

#[test]
fn test_ledger_appends_json_lines_and_creates_parent_dir() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state").join("uploads.jsonl");
    let ledger = Ledger::new(&path);

    let first = record(&dir.path().join("a.pdf"), Outcome::Success, Some("aa"));
    let second = record(&dir.path().join("b.pdf"), Outcome::FailedUpload, None);
    ledger.append(&first).unwrap();
    ledger.append(&second).unwrap();

    let raw = fs::read_to_string(&path).unwrap();
    assert_eq!(raw.lines().count(), 2);
    assert!(raw.contains("\"outcome\":\"success\""));
    assert!(raw.contains("\"outcome\":\"failed_upload\""));

    assert_eq!(ledger.records().unwrap(), vec![first, second]);
}

#[test]
fn test_uploaded_index_only_counts_successes() {
    let dir = tempdir().unwrap();
    let ledger = Ledger::new(dir.path().join("uploads.jsonl"));
    let ok = dir.path().join("ok.pdf");
    let failed = dir.path().join("failed.pdf");
    ledger.append(&record(&ok, Outcome::Success, Some("hash-ok"))).unwrap();
    ledger
        .append(&record(&failed, Outcome::FailedMetadata, Some("hash-failed")))
        .unwrap();

    let index = ledger.uploaded_index().unwrap();
    assert!(index.contains(&ok, None));
    assert!(index.contains(&dir.path().join("elsewhere.pdf"), Some("hash-ok")));
    assert!(!index.contains(&failed, Some("hash-failed")));
}

#[test]
fn test_malformed_ledger_lines_are_skipped() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("uploads.jsonl");
    let ledger = Ledger::new(&path);
    ledger
        .append(&record(&dir.path().join("a.pdf"), Outcome::Success, None))
        .unwrap();
    {
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();
        writeln!(file).unwrap();
    }
    ledger
        .append(&record(&dir.path().join("b.pdf"), Outcome::Success, None))
        .unwrap();

    assert_eq!(ledger.records().unwrap().len(), 2);
}
