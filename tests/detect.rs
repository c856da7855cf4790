use std::fs;

use etx_rs::{
    BoardId, CanonicalDocument, DetectedFormat, Error, Result, SaveFormat, SettingsVersion,
    Storage, detect_path,
};

#[test]
fn extensions_are_never_consulted() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = Storage::new();
    let doc = CanonicalDocument::new(BoardId::TaranisX9d, SettingsVersion::V219);

    // a flat image behind a .yml name is still a flat image
    let disguised = dir.path().join("radio.yml");
    storage.save_to_file(&doc, &disguised, SaveFormat::Eeprom, None)?;
    assert_eq!(
        detect_path(&disguised)?,
        DetectedFormat::Eeprom { board: BoardId::TaranisX9d },
    );

    // and an archive behind a .bin name is still an archive
    let archive = dir.path().join("image.bin");
    let yaml_doc = CanonicalDocument::new(BoardId::Tx16s, SettingsVersion::V221);
    storage.save_to_file(&yaml_doc, &archive, SaveFormat::Archive, None)?;
    assert_eq!(detect_path(&archive)?, DetectedFormat::Archive);
    Ok(())
}

#[test]
fn directories_need_the_radio_marker() -> Result<()> {
    let dir = tempfile::tempdir()?;

    // plain directory: unrecognized
    assert!(matches!(detect_path(dir.path()), Err(Error::UnrecognizedFormat)));

    // the RADIO/radio.yml marker makes it a storage tree
    fs::create_dir_all(dir.path().join("RADIO"))?;
    fs::write(dir.path().join("RADIO/radio.yml"), "version: 221\nboard: tx16s\n")?;
    assert_eq!(detect_path(dir.path())?, DetectedFormat::Directory);
    Ok(())
}

#[test]
fn shared_image_sizes_resolve_through_the_variant_header() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = Storage::new();

    // M128, Sky9x and the 9XR-Pro all store 4096 byte images
    let doc = CanonicalDocument::new(BoardId::NineXrPro, SettingsVersion::V218);
    let path = dir.path().join("pro.bin");
    storage.save_to_file(&doc, &path, SaveFormat::Eeprom, None)?;
    assert_eq!(
        detect_path(&path)?,
        DetectedFormat::Eeprom { board: BoardId::NineXrPro },
    );

    // a zeroed file of the same size names no variant: all candidates
    let blank = dir.path().join("blank.bin");
    fs::write(&blank, vec![0u8; 4096])?;
    match detect_path(&blank) {
        Err(Error::AmbiguousFormat { candidates }) => {
            assert_eq!(candidates.len(), 3);
            assert!(candidates.contains(&BoardId::Sky9x));
        }
        other => panic!("expected AmbiguousFormat, got {other:?}"),
    }
    Ok(())
}

#[test]
fn hex_files_detect_as_their_wrapped_board() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = Storage::new();
    let doc = CanonicalDocument::new(BoardId::Stock9x, SettingsVersion::V216);
    let path = dir.path().join("stock.eepe");
    storage.save_to_file(&doc, &path, SaveFormat::Hex, None)?;

    assert_eq!(detect_path(&path)?, DetectedFormat::Hex { board: BoardId::Stock9x });
    Ok(())
}

#[test]
fn garbage_is_unrecognized_not_misdetected() -> Result<()> {
    let dir = tempfile::tempdir()?;

    // wrong size for every cataloged image
    let odd = dir.path().join("odd.bin");
    fs::write(&odd, vec![0xAB; 3000])?;
    assert!(matches!(detect_path(&odd), Err(Error::UnrecognizedFormat)));

    // text that is neither HEX nor YAML tree
    let text = dir.path().join("notes.txt");
    fs::write(&text, "just some notes\n")?;
    assert!(matches!(detect_path(&text), Err(Error::UnrecognizedFormat)));
    Ok(())
}

#[test]
fn malformed_hex_reports_a_line_number() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("broken.hex");
    fs::write(&path, ":020000040000FA\n:01000000\n")?;

    match detect_path(&path) {
        Err(Error::HexParse { line, .. }) => assert_eq!(line, 2),
        other => panic!("expected HexParse, got {other:?}"),
    }
    Ok(())
}

#[test]
fn open_reports_missing_files_as_io_errors() {
    let missing = std::path::Path::new("/definitely/not/here.etx");
    assert!(matches!(Storage::open(missing), Err(Error::Io(_))));
}
