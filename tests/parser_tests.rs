//! Integration tests for header scanning, multipart walking and the mail layer.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use mimeshell::error::ErrorKind;
use mimeshell::mail::{MailReader, PartKind};
use mimeshell::parser::entity::Entity;
use mimeshell::parser::header::{read_header, RecoveryAction};
use mimeshell::parser::walk::{WalkNode, Walker};
use mimeshell::parser::{ParseMode, ParseOptions};

fn fixture(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn open(name: &str) -> File {
    File::open(fixture(name)).unwrap()
}

/// Every node as (path, media type, decoded body for leaves).
fn walk(name: &str, options: ParseOptions) -> mimeshell::error::Result<Vec<(Vec<usize>, String, Option<Vec<u8>>)>> {
    let mut walker = Walker::read(open(name), options)?;
    let mut nodes = Vec::new();
    while let Some(node) = walker.next()? {
        match node {
            WalkNode::Multipart { path, media_type, .. } => nodes.push((path, media_type.essence, None)),
            WalkNode::Leaf { path, mut entity } => {
                let mut body = Vec::new();
                entity.read_to_end(&mut body)?;
                nodes.push((path, entity.media_type().essence.clone(), Some(body)));
            }
        }
    }
    Ok(nodes)
}

// ─── Multipart walking ─────────────────────────────────────────────

#[test]
fn test_alternative_walked_depth_first() {
    let nodes = walk("alternative.eml", ParseOptions::strict()).unwrap();
    assert_eq!(nodes.len(), 3);
    assert_eq!(nodes[0], (vec![], "multipart/alternative".to_string(), None));
    assert_eq!(
        nodes[1],
        (vec![0], "text/plain".to_string(), Some(b"Text part".to_vec()))
    );
    assert_eq!(
        nodes[2],
        (vec![1], "text/html".to_string(), Some(b"<p>HTML part</p>".to_vec()))
    );
}

#[test]
fn test_strict_and_tolerant_agree_on_well_formed_input() {
    for name in ["alternative.eml", "attachments.eml", "single.eml"] {
        let strict = walk(name, ParseOptions::strict()).unwrap();
        let tolerant = walk(name, ParseOptions::tolerant()).unwrap();
        assert_eq!(strict, tolerant, "{name}");
    }
}

#[test]
fn test_decoded_leaf_bodies() {
    let nodes = walk("attachments.eml", ParseOptions::strict()).unwrap();
    let bodies: Vec<&[u8]> = nodes.iter().filter_map(|n| n.2.as_deref()).collect();
    assert_eq!(bodies.len(), 4);
    assert_eq!(
        String::from_utf8(bodies[0].to_vec()).unwrap(),
        "Résumé attached, see the café figures."
    );
    assert_eq!(bodies[1], b"Quarterly numbers\n");
    assert_eq!(bodies[2], [0u8, 1, 2, 3]);
    assert_eq!(bodies[3], b"GIF89a");
}

#[test]
fn test_truncated_multipart() {
    let err = walk("truncated.eml", ParseOptions::strict()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TruncatedMultipart);

    let nodes = walk("truncated.eml", ParseOptions::tolerant()).unwrap();
    let bodies: Vec<&[u8]> = nodes.iter().filter_map(|n| n.2.as_deref()).collect();
    assert_eq!(bodies, [&b"first"[..], &b"second\r\n"[..]]);
}

// ─── Header scanning ───────────────────────────────────────────────

#[test]
fn test_header_round_trip() {
    let mut raw = Vec::new();
    open("alternative.eml").read_to_end(&mut raw).unwrap();
    let first = read_header(&mut &raw[..], ParseMode::Strict).unwrap();

    let rebuilt = first.header.to_bytes();
    assert!(raw.starts_with(&rebuilt));
    let second = read_header(&mut &rebuilt[..], ParseMode::Strict).unwrap();
    assert_eq!(second.header, first.header);
}

#[test]
fn test_body_without_separator() {
    let entity = Entity::read(open("no_separator.eml"), ParseOptions::tolerant()).unwrap();
    assert_eq!(entity.header.len(), 1);
    assert_eq!(entity.recoveries()[0].action, RecoveryAction::BodyStartedEarly);
    let mut body = String::new();
    entity.into_body().read_to_string(&mut body).unwrap();
    assert!(body.starts_with("<html>\r\n<head>\r\n</head>"));

    let err = Entity::read(open("no_separator.eml"), ParseOptions::strict()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedHeaderLine);
}

#[test]
fn test_leading_space_rejected_in_both_modes() {
    for mode in [ParseMode::Strict, ParseMode::Tolerant] {
        let err = Entity::read(&b" Subject: x\r\n\r\nbody"[..], mode.into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInitialLine);
    }
}

#[test]
fn test_header_limit() {
    let options = ParseOptions {
        max_header_bytes: 128,
        ..ParseOptions::tolerant()
    };
    let err = Entity::read(open("alternative.eml"), options).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HeaderTooLarge);
}

// ─── Mail layer ────────────────────────────────────────────────────

#[test]
fn test_mail_header_accessors() {
    let reader = MailReader::create(open("alternative.eml"), ParseOptions::strict()).unwrap();
    let header = reader.header();
    assert_eq!(header.subject().as_deref(), Some("Café con leña"));
    assert_eq!(header.message_id().as_deref(), Some("<alt001@example.com>"));
    assert_eq!(
        header.date().map(|d| d.to_rfc3339()).as_deref(),
        Some("2025-02-13T09:30:00+00:00")
    );
}

#[test]
fn test_single_part_message_through_mail_reader() {
    let mut reader = MailReader::create(open("single.eml"), ParseOptions::tolerant()).unwrap();
    let mut part = reader.next_part().unwrap().unwrap();
    assert!(part.path().is_empty());
    assert_eq!(part.kind(), &PartKind::Inline);
    let mut body = String::new();
    part.read_to_string(&mut body).unwrap();
    assert_eq!(body, "Who are you?");
    assert!(reader.next_part().unwrap().is_none());
}

#[test]
fn test_attachment_classification() {
    let mut reader = MailReader::create(open("attachments.eml"), ParseOptions::strict()).unwrap();
    let mut kinds = Vec::new();
    while let Some(part) = reader.next_part().unwrap() {
        kinds.push(part.kind().clone());
    }
    assert_eq!(
        kinds,
        [
            PartKind::Inline,
            PartKind::Attachment {
                filename: Some("report.txt".into())
            },
            PartKind::Attachment { filename: None },
            PartKind::Inline,
        ]
    );
}
