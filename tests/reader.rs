mod common;

use common::*;
use pekit::pe::{ModifiableKind, PeReader};

#[test]
fn parses_headers_and_sections() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "app.exe", &standard_image(0x5f00_0000, b"code", (1, 2, 3, 4)));

    let pe = PeReader::open(&path, false).unwrap();
    assert!(pe.is_valid_pe());
    assert!(!pe.is_corrupted());
    assert!(!pe.is_64bit());
    assert!(!pe.is_signed());
    assert_eq!(pe.linker_version(), Some((14, 29)));

    let names: Vec<String> = pe.sections().iter().map(|b| b.description.clone()).collect();
    assert_eq!(names, vec![".text", ".rsrc"]);

    // every section lies inside the mapping
    assert!(pe.sections().total_size() <= pe.file_size());
    for block in pe
        .sections()
        .iter()
        .chain(pe.ignored().iter())
        .chain(pe.interesting().iter())
        .chain(pe.resource_blocks().iter())
    {
        assert!(
            block.offset + block.size <= pe.file_size(),
            "{} escapes the file",
            block.description
        );
    }
}

#[test]
fn rejects_non_pe_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "not.exe", b"certainly not a binary");

    let pe = PeReader::open(&path, false).unwrap();
    assert!(!pe.is_valid_pe());

    let empty = write_file(dir.path(), "tiny.exe", b"MZ");
    let pe = PeReader::open(&empty, false).unwrap();
    assert!(!pe.is_valid_pe());
}

#[test]
fn reads_imports_and_delay_imports() {
    let imports = import_section(0x1000, &["KERNEL32.dll", "USER32.dll"]);
    let delayed = delay_import_section(0x2000, &["SHELL32.dll"]);

    let image = PeBuilder::new()
        .section(".idata", 0x1000, imports.clone())
        .section(".didat", 0x2000, delayed.clone())
        .directory(DIR_IMPORT, 0x1000, imports.len() as u32)
        .directory(DIR_DELAY_IMPORT, 0x2000, delayed.len() as u32)
        .build();

    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "app.exe", &image);
    let pe = PeReader::open(&path, false).unwrap();

    assert!(pe.is_valid_pe());
    assert_eq!(pe.dll_imports(), ["KERNEL32.dll", "USER32.dll"]);
    assert_eq!(pe.delayed_dll_imports(), ["SHELL32.dll"]);
    assert_eq!(
        pe.all_dll_imports(),
        ["KERNEL32.dll", "USER32.dll", "SHELL32.dll"]
    );
}

#[test]
fn reads_codeview_debug_info() {
    let guid = [
        0xe0, 0x04, 0x25, 0x3f, 0x89, 0x4f, 0xd3, 0x11, 0x9a, 0x0c, 0x03, 0x05, 0xe8, 0x2c, 0x33,
        0x01,
    ];
    let debug = debug_section(FIRST_SECTION_OFFSET, guid, 1, r"C:\build\out\app.pdb");

    let image = PeBuilder::new()
        .section(".rdata", 0x1000, debug.clone())
        .directory(DIR_DEBUG, 0x1000, 28)
        .build();

    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "app.exe", &image);
    let pe = PeReader::open(&path, false).unwrap();

    assert!(pe.is_valid_pe());
    assert_eq!(pe.pdb_path(), r"C:\build\out\app.pdb");
    assert_eq!(pe.pdb_guid(), "{3F2504E0-4F89-11D3-9A0C-0305E82C3301}");

    // guid, age, path and the debug timestamp are all ignored ranges
    for tag in ["PDB GUID", "PDB age", "PDB path", "Debug timestamp"] {
        assert!(
            pe.ignored().iter().any(|b| b.description == tag),
            "missing ignored range {tag}"
        );
    }
}

#[test]
fn signature_blob_sets_signed() {
    let builder = PeBuilder::new().section(".text", 0x1000, vec![0x90; 0x20]);
    let blob_offset = builder.overlay_offset();
    let image = builder
        .overlay(b"fake signature blob".to_vec())
        .directory(DIR_SECURITY, blob_offset as u32, 19)
        .build();

    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "signed.exe", &image);
    let pe = PeReader::open(&path, false).unwrap();

    assert!(pe.is_valid_pe());
    assert!(pe.is_signed());
    assert!(pe
        .modifiable()
        .iter()
        .any(|(kind, _)| *kind == ModifiableKind::SignatureDirectory));
    assert!(pe.ignored().iter().any(|b| b.description == "Signature"));
}

#[test]
fn signature_past_eof_is_corrupted() {
    let builder = PeBuilder::new().section(".text", 0x1000, vec![0x90; 0x20]);
    let blob_offset = builder.overlay_offset();
    let image = builder
        .overlay(b"tiny".to_vec())
        .directory(DIR_SECURITY, blob_offset as u32, 0x4000)
        .build();

    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "broken.exe", &image);
    let pe = PeReader::open(&path, false).unwrap();

    assert!(!pe.is_valid_pe());
    assert!(pe.is_corrupted());
    assert!(!pe.is_signed());
}

#[test]
fn resource_tree_and_dump_paths() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "app.exe", &standard_image(0x5f00_0000, b"code", (1, 2, 3, 4)));
    let pe = PeReader::open(&path, false).unwrap();

    let root = pe.resource_directory().expect("resources");
    let leaf = root.at("16/1/1033").expect("version leaf");
    let (offset, size) = leaf.data_location().unwrap();
    assert_eq!(leaf.data(pe.bytes()).unwrap().len(), size);
    assert!(offset + size <= pe.file_size());

    assert!(root.at("16/1/1036").is_none());
    assert!(root.at("24/1").is_none());

    // the version leaf is also a resource block
    assert!(pe
        .resource_blocks()
        .iter()
        .any(|b| b.description == "Resource: 16/1/1033"));

    assert_eq!(pe.file_version(), "1.2.3.4");

    // version slots were recorded for in-place edits
    for kind in [
        ModifiableKind::FileVersion,
        ModifiableKind::ProductVersion,
        ModifiableKind::FileVersionString,
        ModifiableKind::ProductVersionString,
    ] {
        assert!(
            pe.modifiable().iter().any(|(k, _)| *k == kind),
            "missing modifiable slot {kind:?}"
        );
    }
}

#[test]
fn resource_data_descends_single_children() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "app.exe", &standard_image(0x5f00_0000, b"code", (1, 2, 3, 4)));
    let pe = PeReader::open(&path, false).unwrap();

    let direct = pe.resource_data("16/1/1033").unwrap();
    let descended = pe.resource_data("16/1").unwrap();
    assert_eq!(direct, descended);
    assert!(pe.resource_data("16/1/9999").is_err());
    assert!(pe.resource_data("99").is_err());
}

#[test]
fn section_data_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "app.exe", &standard_image(0x5f00_0000, b"code", (1, 2, 3, 4)));
    let pe = PeReader::open(&path, false).unwrap();

    let text = pe.section_data(".text").unwrap();
    assert_eq!(&text[..4], b"code");
    assert!(pe.section_data(".nope").is_err());
}
