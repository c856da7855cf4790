use etx_rs::{
    BoardId, CanonicalDocument, Error, LoadOptions, ModelData, Result, SaveFormat,
    SettingsVersion, Storage,
    document::{Curve, CurvePoint, SwitchPosition, SwitchRef, Timer},
};

fn sample_timer() -> Timer {
    Timer {
        seconds: 300,
        switch: SwitchRef::Switch { index: 0, position: SwitchPosition::Up, inverted: false },
        countdown: true,
        persistent: false,
    }
}

#[test]
fn eeprom_file_roundtrip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("stock9x.bin");

    let storage = Storage::new();
    let mut doc = CanonicalDocument::new(BoardId::Stock9x, SettingsVersion::V216);
    doc.radio.contrast = 30;
    doc.radio.beep_mode = -1;
    let mut trainer = ModelData::named("TRAINER");
    trainer.model_id = 7;
    trainer.timers.push(sample_timer());
    doc.models.set(0, Some(trainer));
    doc.models.set(5, Some(ModelData::named("ACRO")));

    let save_log = storage.save_to_file(&doc, &path, SaveFormat::Eeprom, None)?;
    assert!(save_log.is_empty());

    let loaded = Storage::open(&path)?;
    assert_eq!(loaded.document, doc);
    assert!(!loaded.has_warnings());
    // flat images keep slot numbers
    assert!(loaded.document.models.get(5).is_some());
    assert!(loaded.document.models.get(1).is_none());
    Ok(())
}

#[test]
fn hex_file_roundtrip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("x9d.eepe");

    let storage = Storage::new();
    let mut doc = CanonicalDocument::new(BoardId::TaranisX9d, SettingsVersion::V220);
    doc.radio.owner_callsign = "N0CALL".into();
    let mut model = ModelData::named("Heli 450");
    model.curves.push(Curve {
        smooth: true,
        points: vec![
            CurvePoint { x: -100, y: -80 },
            CurvePoint { x: 0, y: 0 },
            CurvePoint { x: 100, y: 80 },
        ],
    });
    doc.models.set(2, Some(model));

    storage.save_to_file(&doc, &path, SaveFormat::Hex, None)?;

    let text = std::fs::read_to_string(&path)?;
    assert!(text.starts_with(':'));
    assert!(text.trim_end().ends_with(":00000001FF"));

    let loaded = Storage::open(&path)?;
    assert_eq!(loaded.document, doc);
    Ok(())
}

#[test]
fn archive_file_roundtrip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("backup.etx");

    let storage = Storage::new();
    let mut doc = CanonicalDocument::new(BoardId::Tx16s, SettingsVersion::V221);
    doc.radio.owner_callsign = "N0CALL".into();
    let mut glider = ModelData::named("ASW 17");
    glider.add_label("Gliders");
    glider.add_label("Favorites");
    let mut wing = ModelData::named("Wing");
    wing.add_label("Gliders");
    doc.models.set(0, Some(glider));
    doc.models.set(1, Some(wing));
    doc.radio.current_model = 1;

    storage.save_to_file(&doc, &path, SaveFormat::Archive, None)?;

    let loaded = Storage::open(&path)?;
    assert_eq!(loaded.document, doc);
    let labels = &loaded.document.models.get(0).expect("model 0").labels;
    assert_eq!(labels, &["Gliders", "Favorites"]);
    Ok(())
}

#[test]
fn yaml_directory_roundtrip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sdcard");

    let storage = Storage::new();
    let mut doc = CanonicalDocument::new(BoardId::HorusX10, SettingsVersion::V221);
    let mut model = ModelData::named("Scale Cub");
    model.add_label("Scale");
    model.timers.push(sample_timer());
    doc.models.set(0, Some(model));

    storage.save_to_file(&doc, &path, SaveFormat::Directory, None)?;
    assert!(path.join("RADIO/radio.yml").is_file());
    assert!(path.join("MODELS/labels.yml").is_file());
    assert!(path.join("MODELS/model01.yml").is_file());

    let loaded = Storage::open(&path)?;
    assert_eq!(loaded.document, doc);
    Ok(())
}

#[test]
fn legacy_directory_roundtrip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sdcard");

    let storage = Storage::new();
    let mut doc = CanonicalDocument::new(BoardId::HorusX12s, SettingsVersion::V220);
    let mut jet = ModelData::named("Viper");
    jet.add_label("Jets");
    let mut plane = ModelData::named("Edge 540");
    plane.add_label("Planes");
    doc.models.set(0, Some(jet));
    doc.models.set(1, Some(plane));

    storage.save_to_file(&doc, &path, SaveFormat::Directory, None)?;
    assert!(path.join("RADIO/radio.bin").is_file());
    assert!(path.join("RADIO/models.txt").is_file());
    assert!(path.join("MODELS/model01.bin").is_file());

    let loaded = Storage::open(&path)?;
    assert_eq!(loaded.document, doc);
    Ok(())
}

#[test]
fn tree_formats_compact_slot_gaps() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sparse");

    let storage = Storage::new();
    let mut doc = CanonicalDocument::new(BoardId::Tx16s, SettingsVersion::V221);
    doc.models.set(0, Some(ModelData::named("First")));
    doc.models.set(7, Some(ModelData::named("Eighth")));
    doc.radio.current_model = 7;

    storage.save_to_file(&doc, &path, SaveFormat::Directory, None)?;
    let loaded = Storage::open(&path)?;

    // the tree stores an ordered list, not numbered slots; the current
    // model pointer follows its model through the compaction
    assert_eq!(loaded.document.models.used(), 2);
    assert_eq!(
        loaded.document.models.get(1).map(|m| m.name.as_str()),
        Some("Eighth"),
    );
    assert_eq!(loaded.document.radio.current_model, 1);
    Ok(())
}

#[test]
fn expected_board_is_enforced_unless_forced() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("x7.bin");

    let storage = Storage::new();
    let doc = CanonicalDocument::new(BoardId::TaranisX7, SettingsVersion::V219);
    storage.save_to_file(&doc, &path, SaveFormat::Eeprom, None)?;

    let strict = LoadOptions {
        expected_board: Some(BoardId::TaranisX9e),
        ..LoadOptions::default()
    };
    match storage.load(&path, strict, None) {
        Err(Error::WrongBoard { expected, found }) => {
            assert_eq!(expected, BoardId::TaranisX9e);
            assert_eq!(found, BoardId::TaranisX7);
        }
        other => panic!("expected WrongBoard, got {other:?}"),
    }

    let forced = LoadOptions { force_board: true, ..strict };
    let loaded = storage.load(&path, forced, None)?;
    assert_eq!(loaded.document.board, BoardId::TaranisX7);
    assert!(loaded.has_warnings());
    Ok(())
}

#[test]
fn flat_formats_are_refused_for_sdcard_only_boards() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nope.bin");

    let storage = Storage::new();
    let doc = CanonicalDocument::new(BoardId::Tx16s, SettingsVersion::V221);
    match storage.save_to_file(&doc, &path, SaveFormat::Eeprom, None) {
        Err(Error::IncompatibleTarget { board, .. }) => assert_eq!(board, BoardId::Tx16s),
        other => panic!("expected IncompatibleTarget, got {other:?}"),
    }
    assert!(!path.exists());
    Ok(())
}

#[test]
fn tree_formats_are_refused_before_the_sdcard_era() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nope.etx");

    let storage = Storage::new();
    let doc = CanonicalDocument::new(BoardId::Stock9x, SettingsVersion::V216);
    match storage.save_to_file(&doc, &path, SaveFormat::Archive, None) {
        Err(Error::IncompatibleTarget { version, .. }) => {
            assert_eq!(version, SettingsVersion::V216);
        }
        other => panic!("expected IncompatibleTarget, got {other:?}"),
    }
    Ok(())
}

#[test]
fn checksum_damage_is_fatal_unless_ignored() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("dinged.bin");

    let storage = Storage::new();
    let mut doc = CanonicalDocument::new(BoardId::M128, SettingsVersion::V218);
    doc.models.set(0, Some(ModelData::named("GLOW")));
    storage.save_to_file(&doc, &path, SaveFormat::Eeprom, None)?;

    // flip one payload bit without resealing the trailer
    let mut bytes = std::fs::read(&path)?;
    bytes[100] ^= 0x40;
    std::fs::write(&path, &bytes)?;

    match storage.load(&path, LoadOptions::default(), None) {
        Err(Error::ChecksumMismatch { stored, computed }) => assert_ne!(stored, computed),
        other => panic!("expected ChecksumMismatch, got {other:?}"),
    }

    let opts = LoadOptions { ignore_checksum: true, ..LoadOptions::default() };
    let loaded = storage.load(&path, opts, None)?;
    assert!(loaded.has_warnings());
    assert_eq!(loaded.document.board, BoardId::M128);
    Ok(())
}
