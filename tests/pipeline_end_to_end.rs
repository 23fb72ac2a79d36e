// End-to-end: source CSV -> raw table -> processed table -> dashboard view

use property_pipeline::dashboard::{build_view, load_dashboard_data, DashboardFilter};
use property_pipeline::load::read_processed_records;
use property_pipeline::loader::LATEST_EXPORT_FILENAME;
use property_pipeline::{
    count_rows, setup_database, with_session, Config, DistanceCategory, Pipeline, RawRecord,
};
use std::fs;
use std::path::Path;

fn config_in(root: &Path) -> Config {
    Config {
        db_path: root.join("data").join("property_data.db"),
        raw_data_dir: root.join("data").join("raw"),
        processed_data_dir: root.join("data").join("processed"),
        retries: 0,
        retry_delay_secs: 0,
        ..Config::default()
    }
}

fn write_source(config: &Config, rows: &[&str]) {
    fs::create_dir_all(&config.raw_data_dir).unwrap();
    let mut body = RawRecord::COLUMNS.join(",");
    for row in rows {
        body.push('\n');
        body.push_str(row);
    }
    body.push('\n');
    fs::write(config.raw_data_path(), body).unwrap();
}

#[test]
fn three_row_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    write_source(
        &config,
        &[
            "500000,2020-01-10,Parramatta,1,3,,100,House,,,,,,,,,3",
            "50000,2020-01-11,Parramatta,1,1,1,50,Apartment,,,,,,,,,15",
            "2000000,not a date,Mosman,3,4,2,,Townhouse,,,,,,,,,25",
        ],
    );

    let run = with_session(&config.db_path, |session| {
        setup_database(session.conn())?;
        Ok(Pipeline::new(&config, session).run())
    })
    .unwrap();
    assert!(run.succeeded(), "{:?}", run.error);

    let processed = with_session(&config.db_path, |session| {
        assert_eq!(count_rows(session.conn(), "properties_raw")?, 3);
        read_processed_records(session.conn())
    })
    .unwrap();

    assert_eq!(processed.len(), 2);

    let first = &processed[0];
    assert_eq!(first.price_per_sqm, Some(5000.0));
    assert!(first.is_house);
    assert_eq!(first.distance_category, Some(DistanceCategory::InnerCity));
    assert_eq!(first.num_parking, Some(0));
    assert_eq!(first.date_sold.map(|d| d.to_string()), Some("2020-01-10".to_string()));

    let second = &processed[1];
    assert_eq!(second.price_per_sqm, None);
    assert!(second.is_house);
    assert_eq!(second.distance_category, Some(DistanceCategory::OuterSuburbs));
    assert_eq!(second.date_sold, None);

    let quality = &run.etl.as_ref().unwrap().quality;
    assert!(quality.all_passed());
}

#[test]
fn dashboard_reads_export() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    write_source(
        &config,
        &[
            "900000,,Ryde,2,3,1,120,House,,,,,,,,,12",
            "700000,,Ryde,1,2,1,70,Unit,,,,,,,,,12.5",
            "1500000,,Bondi,2,2,1,90,Apartment,,,,,,,,,7",
        ],
    );

    with_session(&config.db_path, |session| {
        setup_database(session.conn())?;
        Pipeline::new(&config, session).run().into_result()
    })
    .unwrap();

    let data = load_dashboard_data(&config.processed_dir().join(LATEST_EXPORT_FILENAME));
    assert!(data.error.is_none());
    assert_eq!(data.records.len(), 3);

    let view = build_view(&data, &DashboardFilter::default());
    assert_eq!(view.metrics.total_properties, 3);
    assert_eq!(view.metrics.filtered_delta, 0);
    assert_eq!(view.metrics.suburbs, 2);
    assert_eq!(view.top_suburbs[0].suburb, "Bondi");
    assert_eq!(view.top_suburbs[1].avg_price, 800_000.0);
    assert_eq!(view.house_vs_apartment.len(), 2);
}

#[test]
fn missing_source_fails_without_touching_tables() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());

    let err = with_session(&config.db_path, |session| {
        setup_database(session.conn())?;
        Pipeline::new(&config, session).run().into_result()
    })
    .unwrap_err();

    assert!(err.to_string().contains("File not found"));
    let rows = with_session(&config.db_path, |session| count_rows(session.conn(), "properties_processed")).unwrap();
    assert_eq!(rows, 0);
}
