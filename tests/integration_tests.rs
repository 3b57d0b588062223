use placement_ledger::*;
use std::fs;
use std::path::Path;

const MATRIX: &str = "\
Vendor Key,FILENAME,Full Placement Name,PLACEMENT,FILENAME_DICTIONARY,FILENAME_ERROR,UNCAPPED,OMIT_PLAN,Date,Impressions,Clicks,Net Cost
API_Meta,meta.csv,Campaign|Placement,Placement,meta_dictionary.csv,meta_errors.csv,FALSE,,Day,Impr,Clicks,Spend
API_Snap,snap.csv,Campaign|Ad,Ad,snap_dictionary.csv,snap_errors.csv,TRUE,,Date,,Clicks,Cost
API_Old,old.csv,Campaign,,old_dictionary.csv,,FALSE,,,,,
API_TikTok,tiktok.csv,Campaign,,tiktok_dictionary.csv,,FALSE,ALL,,,,
Plan Net,,Campaign|Vendor,,,plan_errors.csv,,,,,,
";

fn write(dir: &Path, name: &str, contents: &str) -> anyhow::Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join(name), contents)?;
    Ok(())
}

fn media_fixture(root: &Path) -> anyhow::Result<LedgerConfig> {
    let config = LedgerConfig::with_root(root);

    write(&config.config_dir, "vendormatrix.csv", MATRIX)?;
    write(&config.config_dir, "fee_config.json", r#"{"threshold": 0}"#)?;

    write(
        &config.raw_dir,
        "meta.csv",
        "Day,Campaign,Placement,Impr,Clicks,Spend\n\
         2023-01-01,Spring,Feed,20000,40,1.00\n\
         2023-01-02,Spring,Feed,20000,40,1.00\n\
         2023-01-03,Spring,Feed,20000,40,1.00\n\
         2023-01-01,Summer,Story,5000,10,50.00\n",
    )?;
    write(
        &config.raw_dir,
        "snap.csv",
        "Date,Campaign,Ad,Clicks,Cost\n2023-01-01,Spring,Lens,100,9.99\n",
    )?;
    write(
        &config.raw_dir,
        "tiktok.csv",
        "Date,Campaign\n2023-01-01,Spring\n",
    )?;

    write(
        &config.dictionary_dir,
        "meta_dictionary.csv",
        "FPN,Campaign,Vendor,Buy Model,Buy Rate,Agency Fees Rate,Placement Name\n\
         Spring_Feed,Spring,Meta,CPM,$10.00,0.1,Feed\n",
    )?;
    write(
        &config.dictionary_dir,
        "snap_dictionary.csv",
        "FPN,Campaign,Vendor,Buy Model,Buy Rate,Agency Fees Rate\n\
         Spring_Lens,Spring,Snap,CPC,2,0.1\n",
    )?;
    write(
        &config.dictionary_dir,
        "plannet_dictionary.csv",
        "FPN,Planned Net Cost\nSpring_Meta,500\nSpring_Snap,100\n",
    )?;

    Ok(config)
}

fn rows_for<'a>(ledger: &'a Table, vendor_key: &str) -> Vec<&'a Row> {
    ledger
        .rows
        .iter()
        .filter(|r| r.rendered(columns::VENDOR_KEY) == vendor_key)
        .collect()
}

#[test]
fn test_full_pipeline() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = media_fixture(dir.path())?;

    let ledger = run_pipeline_with_verification(&config, 0.01)?;

    let meta = rows_for(&ledger, "API_Meta");
    let snap = rows_for(&ledger, "API_Snap");
    let plan = rows_for(&ledger, PLAN_NET);
    assert_eq!(meta.len(), 4);
    assert_eq!(snap.len(), 1);
    assert_eq!(plan.len(), 3);
    assert!(rows_for(&ledger, "API_TikTok").is_empty());
    assert!(rows_for(&ledger, "API_Old").is_empty());

    // Priced at CPM, then capped at the 500 plan on the third day.
    let spring: Vec<&&Row> = meta
        .iter()
        .filter(|r| r.rendered(columns::FPN) == "Spring_Feed")
        .collect();
    let net: Vec<f64> = spring.iter().map(|r| r.number_or_zero(columns::NET_COST)).collect();
    let fin: Vec<f64> = spring
        .iter()
        .map(|r| r.number_or_zero(columns::NET_COST_FINAL))
        .collect();
    assert_eq!(net, vec![200.0, 200.0, 200.0]);
    assert_eq!(fin, vec![200.0, 200.0, 100.0]);
    assert!(spring
        .iter()
        .all(|r| r.rendered(columns::PLAN_FPN) == "Spring_Meta"));
    assert!((spring[2].number_or_zero(columns::AGENCY_FEES) - 10.0).abs() < 0.01);

    // Unresolved placement keeps its delivery and raw spend, attributes are null.
    let summer = meta
        .iter()
        .find(|r| r.rendered(columns::FPN) == "Summer_Story")
        .expect("unresolved row kept");
    assert_eq!(summer.get("Buy Model"), Some(&Value::Null));
    assert_eq!(summer.number(columns::IMPRESSIONS), Some(5000.0));
    assert_eq!(summer.number(columns::NET_COST), Some(50.0));

    // Uncapped source is not limited by its 100 plan.
    assert_eq!(snap[0].number(columns::NET_COST_FINAL), Some(200.0));
    assert_eq!(snap[0].rendered(columns::UNCAPPED), "TRUE");

    let planned: f64 = plan
        .iter()
        .map(|r| r.number_or_zero(columns::PLANNED_NET_COST))
        .sum();
    assert!((planned - 600.0).abs() < 0.01);

    assert!((ledger.column_sum(columns::NET_COST_FINAL) - 750.0).abs() < 0.01);
    assert!((ledger.column_sum(columns::TOTAL_COST) - 820.0).abs() < 0.01);

    let errors = CsvStore::new(&config.error_dir);
    let meta_errors = errors.load("meta_errors.csv")?;
    assert_eq!(meta_errors.len(), 1);
    assert_eq!(meta_errors.rows[0].rendered(columns::FPN), "Summer_Story");
    assert!(!errors.exists("snap_errors.csv"));

    Ok(())
}

#[test]
fn test_error_report_clears_once_resolved() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = media_fixture(dir.path())?;
    let errors = CsvStore::new(&config.error_dir);

    run_pipeline(&config)?;
    assert!(errors.exists("meta_errors.csv"));

    write(
        &config.dictionary_dir,
        "meta_dictionary.csv",
        "FPN,Campaign,Vendor,Buy Model,Buy Rate\n\
         Spring_Feed,Spring,Meta,CPM,10\n\
         Summer_Story,Summer,Meta,CPC,1\n",
    )?;
    let ledger = run_pipeline(&config)?;

    assert!(!errors.exists("meta_errors.csv"));
    let summer = ledger
        .rows
        .iter()
        .find(|r| r.rendered(columns::FPN) == "Summer_Story")
        .expect("summer row");
    assert_eq!(summer.number(columns::NET_COST), Some(10.0));
    Ok(())
}

#[test]
fn test_auto_dictionary_populates_from_placement_names() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = LedgerConfig::with_root(dir.path());
    write(
        &config.config_dir,
        "vendormatrix.csv",
        "Vendor Key,FILENAME,Full Placement Name,PLACEMENT,AUTO DICTIONARY ORDER,FILENAME_DICTIONARY,Date,Clicks\n\
         API_Snap,snap.csv,Ad,Ad,Campaign|Vendor|Country::Region::-,snap_dictionary.csv,Date,Clicks\n\
         Plan Net,,Campaign|Vendor,,,,,\n",
    )?;
    write(
        &config.raw_dir,
        "snap.csv",
        "Date,Ad,Clicks\n2023-02-01,Winter_Snap_US-West,7\n",
    )?;

    let ledger = run_pipeline(&config)?;

    let snap = rows_for(&ledger, "API_Snap");
    let row = snap[0];
    assert_eq!(row.rendered("Campaign"), "Winter");
    assert_eq!(row.rendered("Region"), "West");
    assert_eq!(row.rendered(columns::PLAN_FPN), "Winter_Snap");

    let dictionary = Dictionary::load(
        &CsvStore::new(&config.dictionary_dir),
        "snap_dictionary.csv",
        DictionaryKind::Placement,
    )?;
    assert!(dictionary.contains("Winter_Snap_US-West"));
    assert!(!config.error_dir.join("API_Snap.csv").exists());
    Ok(())
}

#[test]
fn test_unreadable_source_is_skipped() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = media_fixture(dir.path())?;
    fs::write(
        config.raw_dir.join("snap.csv"),
        b"Date,Campaign,Ad,Clicks,Cost\n2023-01-01,Caf\xE9,Lens,100,9.99\n",
    )?;

    let ledger = run_pipeline(&config)?;

    assert!(rows_for(&ledger, "API_Snap").is_empty());
    assert_eq!(rows_for(&ledger, "API_Meta").len(), 4);
    assert!((ledger.column_sum(columns::NET_COST_FINAL) - 550.0).abs() < 0.01);
    Ok(())
}

#[test]
fn test_missing_plan_net_is_fatal() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = media_fixture(dir.path())?;
    let without_plan: String = MATRIX
        .lines()
        .filter(|l| !l.starts_with(PLAN_NET))
        .map(|l| format!("{}\n", l))
        .collect();
    write(&config.config_dir, "vendormatrix.csv", &without_plan)?;

    assert!(matches!(
        run_pipeline(&config),
        Err(LedgerError::MissingPlanNet(_))
    ));
    Ok(())
}

#[test]
fn test_schema_generation() {
    let schema = LedgerConfig::schema_as_json().expect("schema serializes");
    assert!(schema.contains("raw_dir"));
    assert!(schema.contains("plan_dictionary_file"));
}
