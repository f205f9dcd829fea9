//! Built-in blueprints for the UAV types the tracker started with.

use anyhow::Result;
use bpla_common::{Blueprint, Department};
use tracing::info;

use super::db::TrackerDb;

const ELECTRICAL_LABELS: &[(&str, &str)] = &[
    ("telemetry_id", "Модуль телеметрии"),
    ("bec_id", "BEC"),
    ("gps_id", "GPS модуль"),
    ("video_tx_id", "Видеопередатчик"),
    ("pvd_id", "ПВД"),
    ("seal_number", "Номер пломбы"),
];

/// Electrical keys per legacy type id.
const ELECTRICAL_KEYS: &[(i64, &[&str])] = &[
    (2, &["telemetry_id", "bec_id", "gps_id", "video_tx_id", "pvd_id", "seal_number"]),
    (1, &["telemetry_id", "bec_id", "gps_id", "video_tx_id", "pvd_id"]),
    (4, &["telemetry_id", "bec_id", "gps_id", "video_tx_id"]),
    (5, &["telemetry_id", "bec_id", "gps_id", "video_tx_id"]),
];

const WORKSHOP_PARAMS: &[(&str, &str)] = &[
    ("engine_installation", "Установка двигателя"),
    ("catapult_hooks", "Крюки катапульты"),
    ("fuel_system", "Топливная система"),
    ("rods", "Тяги"),
    ("lead_weight", "Свинцовый груз"),
];

const SETUP_PARAMS: &[(&str, &str)] = &[
    ("traction_date", "Тяга"),
    ("angle_date", "Углы"),
    ("acceleration_date", "Разгон"),
    ("osd_date", "OSD"),
    ("osd_configured_date", "OSD настроено"),
    ("plugs_date", "Свечи"),
    ("engine_start_date", "Запуск двигателя"),
];

fn electrical_label(key: &str) -> &str {
    ELECTRICAL_LABELS
        .iter()
        .find(|(k, _)| *k == key)
        .map_or(key, |(_, label)| *label)
}

/// Every legacy `(type, department, blueprint)` triple.
pub fn legacy_blueprints() -> Vec<(i64, Department, Blueprint)> {
    let workshop = Blueprint::from_pairs(WORKSHOP_PARAMS.iter().copied());
    let setup = Blueprint::from_pairs(SETUP_PARAMS.iter().copied());
    let mut seeds = Vec::new();
    for (bpla_id, keys) in ELECTRICAL_KEYS {
        let electrical = Blueprint::from_pairs(keys.iter().map(|k| (*k, electrical_label(k))));
        seeds.push((*bpla_id, Department::Workshop, workshop.clone()));
        seeds.push((*bpla_id, Department::Electrical, electrical));
        seeds.push((*bpla_id, Department::Setup, setup.clone()));
    }
    seeds
}

/// Load the legacy blueprints, leaving any already configured department
/// untouched. Returns how many configs were written.
pub fn seed_legacy(db: &TrackerDb) -> Result<usize> {
    let written = db.seed_blueprints(&legacy_blueprints())?;
    info!(written, "legacy blueprints seeded");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_electrical_sets() {
        let seeds = legacy_blueprints();
        let electrical = |id: i64| {
            seeds
                .iter()
                .find(|(b, d, _)| *b == id && *d == Department::Electrical)
                .map(|(_, _, bp)| bp.keys().map(str::to_string).collect::<Vec<_>>())
                .unwrap()
        };
        assert_eq!(electrical(2).len(), 6);
        assert!(electrical(2).contains(&"seal_number".to_string()));
        assert_eq!(electrical(1).len(), 5);
        assert_eq!(electrical(4), electrical(5));
        assert!(!electrical(4).contains(&"pvd_id".to_string()));
    }

    #[test]
    fn test_labels_and_validity() {
        for (_, _, blueprint) in legacy_blueprints() {
            assert!(blueprint.validate().is_ok());
        }
        let seeds = legacy_blueprints();
        let (_, _, bp) = seeds
            .iter()
            .find(|(b, d, _)| *b == 2 && *d == Department::Electrical)
            .unwrap();
        assert_eq!(bp.label("telemetry_id"), Some("Модуль телеметрии"));
        assert_eq!(bp.label("seal_number"), Some("Номер пломбы"));
    }

    #[test]
    fn test_seed_is_idempotent_and_keeps_existing_configs() {
        let db = TrackerDb::new_in_memory().unwrap();
        let custom = Blueprint::from_pairs([("osd_date", "OSD")]);
        let bpla = db.create_bpla("Свой", None).unwrap();
        assert_eq!(bpla.id, 1);
        db.set_blueprint(1, Department::Setup, &custom).unwrap();

        let written = seed_legacy(&db).unwrap();
        assert_eq!(written, 11);
        assert_eq!(seed_legacy(&db).unwrap(), 0);

        assert_eq!(db.get_blueprint(1, Department::Setup).unwrap(), Some(custom));
        assert_eq!(db.get_bpla(1).unwrap().unwrap().name, "Свой");
        assert_eq!(db.get_bpla(5).unwrap().unwrap().name, "БПЛА 5");
        assert!(db.get_blueprint(2, Department::Electrical).unwrap().is_some());
    }
}
