mod common;
use common::*;

use std::sync::Arc;

use dex_format::{HEADER_LEN, MAGIC_LEN, NO_INDEX, SIGNATURE_LEN};
use dexbridge::wire::{RawClassDef, RawField, describe_raw_container};
use dexbridge::{
    ClassDef, ClassReader, ContainerError, Dialect, RawContainer, TranslationUnit,
    TranslatorAdapter, ValidationError, WireError, decode_container, describe_container,
    encode_container, validate_container,
};

fn translated(name: &str) -> ClassDef {
    TranslatorAdapter::default()
        .translate(&ClassReader::new(name, Arc::from(sample_class(name))))
        .expect("translate should succeed")
}

fn unit_of(classes: &[&str]) -> TranslationUnit {
    let mut unit = TranslationUnit::new(Dialect::V035);
    for name in classes {
        unit.add(translated(name)).expect("add should succeed");
    }
    unit
}

#[test]
fn header_carries_magic_signature_and_size() {
    let bytes = encode_container(&unit_of(&["user.Gen"])).expect("encode should succeed");
    assert_eq!(&bytes[..MAGIC_LEN], b"dex\n035\0");
    let declared = u32::from_le_bytes(
        bytes[MAGIC_LEN + SIGNATURE_LEN..MAGIC_LEN + SIGNATURE_LEN + 4]
            .try_into()
            .expect("size field"),
    );
    assert_eq!(declared as usize, bytes.len());
    assert!(bytes.len() > HEADER_LEN);
}

#[test]
fn decoded_container_resolves_to_the_same_classes() {
    let unit = unit_of(&["user.Gen", "user.Other"]);
    let bytes = encode_container(&unit).expect("encode should succeed");
    let raw = decode_container(&bytes).expect("decode should succeed");
    assert_eq!(raw.dialect, Dialect::V035);
    let resolved = raw.resolve().expect("resolve should succeed");
    assert_eq!(resolved.classes(), unit.classes());
}

#[test]
fn encoding_is_deterministic_and_ordered() {
    let first = encode_container(&unit_of(&["user.B", "user.A"])).expect("encode should succeed");
    let second = encode_container(&unit_of(&["user.B", "user.A"])).expect("encode should succeed");
    assert_eq!(first, second);

    let raw = decode_container(&first).expect("decode should succeed");
    let unit = raw.resolve().expect("resolve should succeed");
    let names = unit
        .classes()
        .iter()
        .map(|class| class.descriptor.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["Luser/B;", "Luser/A;"]);
}

#[test]
fn shared_strings_are_interned_once() {
    let bytes = encode_container(&unit_of(&["user.A", "user.B"])).expect("encode should succeed");
    let raw = decode_container(&bytes).expect("decode should succeed");
    let object = raw
        .strings
        .iter()
        .filter(|value| value.as_str() == "Ljava/lang/Object;")
        .count();
    assert_eq!(object, 1);
}

#[test]
fn empty_unit_encodes() {
    let bytes =
        encode_container(&TranslationUnit::new(Dialect::V038)).expect("encode should succeed");
    let raw = decode_container(&bytes).expect("decode should succeed");
    assert_eq!(raw.dialect, Dialect::V038);
    assert!(raw.classes.is_empty());
}

#[test]
fn unit_rejects_duplicate_classes() {
    let mut unit = TranslationUnit::new(Dialect::V035);
    unit.add(translated("user.Gen")).expect("first add should succeed");
    let err = unit
        .add(translated("user.Gen"))
        .expect_err("duplicate add should fail");
    assert_eq!(err, ContainerError::DuplicateClass("Luser/Gen;".to_string()));
    assert_eq!(unit.len(), 1);
}

#[test]
fn decode_rejects_corruption() {
    let bytes = encode_container(&unit_of(&["user.Gen"])).expect("encode should succeed");

    let mut magic = bytes.clone();
    magic[0] = b'x';
    assert!(matches!(decode_container(&magic), Err(WireError::InvalidMagic(_))));

    let mut dialect = bytes.clone();
    dialect[4..8].copy_from_slice(b"099\0");
    assert!(matches!(
        decode_container(&dialect),
        Err(WireError::UnsupportedDialect(_))
    ));

    let mut tampered = bytes.clone();
    let last = tampered.len() - 1;
    tampered[last] ^= 0xFF;
    assert_eq!(decode_container(&tampered), Err(WireError::SignatureMismatch));

    let truncated = &bytes[..bytes.len() - 1];
    assert!(matches!(
        decode_container(truncated),
        Err(WireError::FileSizeMismatch { .. })
    ));

    assert_eq!(decode_container(&bytes[..6]), Err(WireError::UnexpectedEof));
}

fn raw_with_class(class: RawClassDef) -> RawContainer {
    RawContainer {
        dialect: Dialect::V035,
        strings: vec![
            "Luser/Gen;".to_string(),
            "I".to_string(),
            "count".to_string(),
        ],
        types: vec![0, 1],
        classes: vec![class],
    }
}

fn raw_class() -> RawClassDef {
    RawClassDef {
        class_idx: 0,
        access_flags: 1,
        superclass_idx: NO_INDEX,
        interfaces: Vec::new(),
        source_file_idx: NO_INDEX,
        fields: vec![RawField {
            name_idx: 2,
            type_idx: 1,
            access_flags: 1,
        }],
        methods: Vec::new(),
    }
}

#[test]
fn validation_accepts_consistent_indexes() {
    validate_container(&raw_with_class(raw_class())).expect("validate should succeed");
}

#[test]
fn validation_rejects_bad_indexes() {
    let mut class = raw_class();
    class.fields[0].type_idx = 9;
    assert!(matches!(
        validate_container(&raw_with_class(class)),
        Err(ValidationError::InvalidTypeIndex { index: 9, .. })
    ));

    let mut class = raw_class();
    class.fields[0].name_idx = 40;
    assert!(matches!(
        validate_container(&raw_with_class(class)),
        Err(ValidationError::InvalidStringIndex { index: 40, .. })
    ));

    let mut class = raw_class();
    class.superclass_idx = 1;
    assert!(matches!(
        validate_container(&raw_with_class(class)),
        Err(ValidationError::NonClassType { context: "superclass", .. })
    ));
}

#[test]
fn validation_rejects_duplicate_classes_and_bad_types() {
    let mut raw = raw_with_class(raw_class());
    raw.classes.push(raw_class());
    assert_eq!(
        validate_container(&raw),
        Err(ValidationError::DuplicateClass("Luser/Gen;".to_string()))
    );

    let mut raw = raw_with_class(raw_class());
    raw.strings[1] = "user.Gen".to_string();
    assert!(matches!(
        validate_container(&raw),
        Err(ValidationError::MalformedTypeDescriptor(_))
    ));
}

#[test]
fn describe_lists_classes_and_members() {
    let bytes = encode_container(&unit_of(&["user.Gen"])).expect("encode should succeed");
    let text = describe_container(&bytes).expect("describe should succeed");
    assert!(text.starts_with("dialect: dex 035\n"));
    assert!(text.contains("class Luser/Gen; access=0x0001 super=Ljava/lang/Object;"));
    assert!(text.contains("field count:I"));
    assert!(text.contains("method <init>()V"));

    let raw = decode_container(&bytes).expect("decode should succeed");
    assert_eq!(describe_raw_container(&raw), text);
}
