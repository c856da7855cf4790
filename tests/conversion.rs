use etx_rs::{
    BoardId, CanonicalDocument, Error, ModelData, Pipeline, Result, SettingsVersion, Severity,
    convert::{RuleKey, RuleTable, StepAction, VersionStep},
    document::{Curve, CurvePoint, Timer},
};

fn curve_with_points(count: usize) -> Curve {
    // evenly spread points from -100 to 100 on both axes
    let points = (0..count)
        .map(|i| {
            let x = (-100 + 200 * i as i32 / (count as i32 - 1)) as i8;
            CurvePoint { x, y: x }
        })
        .collect();
    Curve { smooth: false, points }
}

fn timer(seconds: u32) -> Timer {
    Timer { seconds, ..Timer::default() }
}

#[test]
fn upgrades_only_note_the_version_walk() -> Result<()> {
    let pipeline = Pipeline::new();
    let mut doc = CanonicalDocument::new(BoardId::TaranisX9d, SettingsVersion::V218);
    let mut model = ModelData::named("Calmato");
    model.timers.push(timer(480));
    doc.models.set(0, Some(model));

    let (out, log) = pipeline.convert(&doc, SettingsVersion::V220)?;

    assert_eq!(out.version, SettingsVersion::V220);
    assert_eq!(out.models, doc.models);
    assert_eq!(out.radio, doc.radio);
    // two ladder edges, nothing else
    assert_eq!(log.len(), 2);
    assert_eq!(log.worst(), Some(Severity::Convert));
    Ok(())
}

#[test]
fn downgrade_truncates_and_drops_per_version() -> Result<()> {
    let pipeline = Pipeline::new();
    let mut doc = CanonicalDocument::new(BoardId::TaranisX9d, SettingsVersion::V219);
    doc.radio.owner_callsign = "N0CALL".into();
    let mut model = ModelData::named("Slick 540");
    model.extended_limits = true;
    model.timers.extend([timer(60), timer(120), timer(180)]);
    model.curves.push(curve_with_points(17));
    doc.models.set(0, Some(model));

    let (out, log) = pipeline.convert(&doc, SettingsVersion::V216)?;

    assert_eq!(out.version, SettingsVersion::V216);
    assert!(out.radio.owner_callsign.is_empty());
    let model = out.models.get(0).expect("model 0");
    assert_eq!(model.name, "Slick 54");
    assert_eq!(model.timers.len(), 1);
    assert_eq!(model.timers[0].seconds, 60);
    assert!(!model.extended_limits);
    assert_eq!(model.curves[0].points.len(), 9);
    assert_eq!(model.curves[0].points[0], CurvePoint { x: -100, y: -100 });
    assert_eq!(model.curves[0].points[8], CurvePoint { x: 100, y: 100 });
    assert_eq!(log.worst(), Some(Severity::Warning));

    let fields: Vec<&str> = log.entries().iter().map(|e| e.field.as_str()).collect();
    for expected in ["owner_callsign", "name", "timer", "points", "flags"] {
        assert!(fields.contains(&expected), "missing log entry for {expected}");
    }
    Ok(())
}

#[test]
fn wide_timers_clamp_below_v220() -> Result<()> {
    let pipeline = Pipeline::new();
    let mut doc = CanonicalDocument::new(BoardId::HorusX10, SettingsVersion::V220);
    let mut model = ModelData::named("LongHaul");
    model.timers.push(timer(0x0001_2345));
    model.curves.push(curve_with_points(21));
    doc.models.set(0, Some(model));

    let (out, log) = pipeline.convert(&doc, SettingsVersion::V219)?;

    let model = out.models.get(0).expect("model 0");
    assert_eq!(model.timers[0].seconds, 0xFFFF);
    assert_eq!(model.curves[0].points.len(), 17);
    assert!(log.entries().iter().any(|e| e.action == "clamped"));
    Ok(())
}

#[test]
fn labels_collapse_to_the_first_below_v221() -> Result<()> {
    let pipeline = Pipeline::new();
    let mut doc = CanonicalDocument::new(BoardId::Tx16s, SettingsVersion::V221);
    let mut model = ModelData::named("Viper");
    model.add_label("Jets");
    model.add_label("Favorites");
    doc.models.set(0, Some(model));

    let (out, log) = pipeline.convert(&doc, SettingsVersion::V220)?;

    assert_eq!(out.models.get(0).expect("model 0").labels, vec!["Jets".to_string()]);
    assert!(log.entries().iter().any(|e| e.field == "labels"));
    Ok(())
}

#[test]
fn converting_to_the_same_version_is_identity() -> Result<()> {
    let pipeline = Pipeline::new();
    let mut doc = CanonicalDocument::new(BoardId::TaranisX7, SettingsVersion::V219);
    doc.models.set(3, Some(ModelData::named("Trainer")));

    let (out, log) = pipeline.convert(&doc, SettingsVersion::V219)?;
    assert_eq!(out, doc);
    assert!(log.is_empty());
    Ok(())
}

#[test]
fn retarget_fits_capacity_of_the_smaller_board() -> Result<()> {
    let pipeline = Pipeline::new();
    let mut doc = CanonicalDocument::new(BoardId::TaranisX9d, SettingsVersion::V219);
    doc.models.set(0, Some(ModelData::named("Keeper")));
    doc.models.set(20, Some(ModelData::named("Dropped")));
    doc.radio.current_model = 20;

    let (out, log) = pipeline.retarget(&doc, BoardId::Stock9x, SettingsVersion::V216)?;

    assert_eq!(out.board, BoardId::Stock9x);
    assert_eq!(out.version, SettingsVersion::V216);
    assert_eq!(out.models.capacity(), 16);
    assert_eq!(out.models.used(), 1);
    assert!(out.models.get(0).is_some());
    assert_eq!(log.worst(), Some(Severity::Error));
    assert!(log.entries().iter().any(|e| e.action.contains("no free slot")));
    // the pointer cannot keep naming a slot the board does not have
    assert_eq!(out.radio.current_model, 15);
    Ok(())
}

#[test]
fn board_specific_steps_override_the_any_board_step() -> Result<()> {
    let mut steps = RuleTable::standard().steps().to_vec();
    steps.push(VersionStep {
        key: RuleKey {
            board: Some(BoardId::Stock9x),
            from: SettingsVersion::V218,
            to: SettingsVersion::V216,
        },
        actions: vec![StepAction::TruncateNames { max: 6 }],
    });
    let pipeline = Pipeline::with_table(RuleTable::from_steps(steps)?);

    let mut doc = CanonicalDocument::new(BoardId::Stock9x, SettingsVersion::V218);
    doc.models.set(0, Some(ModelData::named("Longname9")));

    let (out, _) = pipeline.convert(&doc, SettingsVersion::V216)?;
    assert_eq!(out.models.get(0).expect("model 0").name, "Longna");
    Ok(())
}

#[test]
fn rule_tables_reject_gaps_and_duplicates() {
    // empty table covers no edges
    assert!(matches!(
        RuleTable::from_steps(Vec::new()),
        Err(Error::InvalidRuleTable { .. })
    ));

    // a step skipping a rung is rejected
    let mut steps = RuleTable::standard().steps().to_vec();
    steps.push(VersionStep {
        key: RuleKey { board: None, from: SettingsVersion::V216, to: SettingsVersion::V219 },
        actions: Vec::new(),
    });
    assert!(matches!(
        RuleTable::from_steps(steps),
        Err(Error::InvalidRuleTable { .. })
    ));

    // the same key twice is rejected
    let mut steps = RuleTable::standard().steps().to_vec();
    steps.push(steps[0].clone());
    assert!(matches!(
        RuleTable::from_steps(steps),
        Err(Error::InvalidRuleTable { .. })
    ));
}
