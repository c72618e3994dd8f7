//! Versioned mapping from nested SIRENE record paths to flat column names.
//!
//! Bump [`FIELD_MAP_VERSION`] whenever a mapping or column list changes so
//! that downstream consumers can detect a schema change.

use serde_json::Value;

pub const FIELD_MAP_VERSION: u32 = 1;

/// One nested path (dot separated) and the flat column it lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    pub path: &'static str,
    pub column: &'static str,
}

const fn same(path: &'static str) -> FieldMapping {
    FieldMapping { path, column: path }
}

const fn period(path: &'static str, column: &'static str) -> FieldMapping {
    FieldMapping { path, column }
}

// ============================================================================
// Column Names
// ============================================================================

pub const SIRET: &str = "siret";
pub const SIREN: &str = "siren";
pub const DATE_CREATION_ETAB: &str = "dateCreationEtablissement";
pub const TRANCHE_EFFECTIFS_ETAB: &str = "trancheEffectifsEtablissement";
pub const DATE_CREATION_UL: &str = "uniteLegale.dateCreationUniteLegale";
pub const CATEGORIE_JURIDIQUE: &str = "uniteLegale.categorieJuridiqueUniteLegale";
pub const CATEGORIE_JURIDIQUE_NIV2: &str = "uniteLegale.categorieJuridiqueUniteLegaleNiv2";
pub const TRANCHE_EFFECTIFS_UL: &str = "uniteLegale.trancheEffectifsUniteLegale";
pub const CODE_COMMUNE: &str = "adresseEtablissement.codeCommuneEtablissement";
pub const LAMBERT_X: &str = "adresseEtablissement.coordonneeLambertAbscisseEtablissement";
pub const LAMBERT_Y: &str = "adresseEtablissement.coordonneeLambertOrdonneeEtablissement";
pub const PERIOD_STATE: &str = "periode.etatAdministratifEtablissement";
pub const PERIOD_ACTIVITY: &str = "periode.activitePrincipaleEtablissement";
pub const NB_ETABLISSEMENTS: &str = "nb_etablissements";

pub const LONGITUDE: &str = "longitude";
pub const LATITUDE: &str = "latitude";
pub const DEPARTEMENT: &str = "departement";
pub const DEPT_ANOMALY: &str = "dept_anomaly";

pub const ANCIENNETE_ETAB: &str = "anciennete_etab_annees";
pub const TRANCHE_ANCIENNETE_ETAB: &str = "tranche_anciennete_etab";
pub const CATEGORIE_EFFECTIFS_ETAB: &str = "categorie_effectifs_etab";
pub const DIVISION_APE_ETAB: &str = "division_ape_etab";
pub const TYPE_ACTIVITE_ETAB: &str = "type_activite_etab";
pub const ANCIENNETE_UL: &str = "anciennete_ul_annees";
pub const TRANCHE_ANCIENNETE_UL: &str = "tranche_anciennete_ul";
pub const CATEGORIE_EFFECTIFS_UL: &str = "categorie_effectifs_ul";

/// Active administrative state.
pub const ACTIVE_STATE: &str = "A";

// ============================================================================
// Mappings
// ============================================================================

/// Establishment-level fields, flattened from each raw record.
pub const ESTABLISHMENT_FIELDS: &[FieldMapping] = &[
    same(SIRET),
    same(SIREN),
    same("statutDiffusionEtablissement"),
    same(DATE_CREATION_ETAB),
    same(TRANCHE_EFFECTIFS_ETAB),
    same("anneeEffectifsEtablissement"),
    same("activitePrincipaleRegistreMetiersEtablissement"),
    same("etablissementSiege"),
    same("uniteLegale.statutDiffusionUniteLegale"),
    same("uniteLegale.etatAdministratifUniteLegale"),
    same(DATE_CREATION_UL),
    same(CATEGORIE_JURIDIQUE),
    same("uniteLegale.denominationUniteLegale"),
    same("uniteLegale.sigleUniteLegale"),
    same("uniteLegale.denominationUsuelle1UniteLegale"),
    same("uniteLegale.activitePrincipaleUniteLegale"),
    same("uniteLegale.categorieEntreprise"),
    same(TRANCHE_EFFECTIFS_UL),
    same("uniteLegale.anneeEffectifsUniteLegale"),
    same("adresseEtablissement.numeroVoieEtablissement"),
    same("adresseEtablissement.typeVoieEtablissement"),
    same("adresseEtablissement.libelleVoieEtablissement"),
    same("adresseEtablissement.codePostalEtablissement"),
    same("adresseEtablissement.libelleCommuneEtablissement"),
    same(CODE_COMMUNE),
    same(LAMBERT_X),
    same(LAMBERT_Y),
    same("adresseEtablissement.libellePaysEtrangerEtablissement"),
];

/// Array of administrative periods inside a raw record.
pub const PERIODS_PATH: &str = "periodesEtablissement";

/// Start date used to pick the latest period.
pub const PERIOD_START: &str = "dateDebut";

/// Fields of the latest period, flattened under the `periode.` prefix.
pub const PERIOD_FIELDS: &[FieldMapping] = &[
    period(PERIOD_START, "periode.dateDebut"),
    period("dateFin", "periode.dateFin"),
    period("etatAdministratifEtablissement", PERIOD_STATE),
    period("activitePrincipaleEtablissement", PERIOD_ACTIVITY),
];

// ============================================================================
// Column Sets
// ============================================================================

/// Columns kept after cleaning, in output order.
pub const USEFUL_COLUMNS: &[&str] = &[
    SIRET,
    "statutDiffusionEtablissement",
    DATE_CREATION_ETAB,
    TRANCHE_EFFECTIFS_ETAB,
    "anneeEffectifsEtablissement",
    "activitePrincipaleRegistreMetiersEtablissement",
    PERIOD_ACTIVITY,
    "etablissementSiege",
    PERIOD_STATE,
    SIREN,
    "uniteLegale.statutDiffusionUniteLegale",
    "uniteLegale.etatAdministratifUniteLegale",
    DATE_CREATION_UL,
    CATEGORIE_JURIDIQUE,
    CATEGORIE_JURIDIQUE_NIV2,
    "uniteLegale.denominationUniteLegale",
    "uniteLegale.sigleUniteLegale",
    "uniteLegale.denominationUsuelle1UniteLegale",
    "uniteLegale.activitePrincipaleUniteLegale",
    "uniteLegale.categorieEntreprise",
    TRANCHE_EFFECTIFS_UL,
    "uniteLegale.anneeEffectifsUniteLegale",
    "adresseEtablissement.numeroVoieEtablissement",
    "adresseEtablissement.typeVoieEtablissement",
    "adresseEtablissement.libelleVoieEtablissement",
    "adresseEtablissement.codePostalEtablissement",
    "adresseEtablissement.libelleCommuneEtablissement",
    CODE_COMMUNE,
    LAMBERT_X,
    LAMBERT_Y,
    "adresseEtablissement.libellePaysEtrangerEtablissement",
];

pub const ESTABLISHMENT_COLUMNS: &[&str] = &[
    SIRET,
    SIREN,
    "statutDiffusionEtablissement",
    DATE_CREATION_ETAB,
    TRANCHE_EFFECTIFS_ETAB,
    "anneeEffectifsEtablissement",
    "activitePrincipaleRegistreMetiersEtablissement",
    PERIOD_ACTIVITY,
    "etablissementSiege",
    PERIOD_STATE,
    "adresseEtablissement.numeroVoieEtablissement",
    "adresseEtablissement.typeVoieEtablissement",
    "adresseEtablissement.libelleVoieEtablissement",
    "adresseEtablissement.codePostalEtablissement",
    "adresseEtablissement.libelleCommuneEtablissement",
    CODE_COMMUNE,
    LAMBERT_X,
    LAMBERT_Y,
    "adresseEtablissement.libellePaysEtrangerEtablissement",
];

pub const LEGAL_UNIT_COLUMNS: &[&str] = &[
    SIREN,
    "uniteLegale.statutDiffusionUniteLegale",
    "uniteLegale.etatAdministratifUniteLegale",
    DATE_CREATION_UL,
    CATEGORIE_JURIDIQUE,
    CATEGORIE_JURIDIQUE_NIV2,
    "uniteLegale.denominationUniteLegale",
    "uniteLegale.sigleUniteLegale",
    "uniteLegale.denominationUsuelle1UniteLegale",
    "uniteLegale.activitePrincipaleUniteLegale",
    "uniteLegale.categorieEntreprise",
    TRANCHE_EFFECTIFS_UL,
    "uniteLegale.anneeEffectifsUniteLegale",
    NB_ETABLISSEMENTS,
];

// ============================================================================
// Flattening
// ============================================================================

/// Follows a dot-separated path through nested objects.
///
/// Returns `None` as soon as a segment is missing or a non-object is met.
pub fn lookup<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(record, |node, segment| node.as_object()?.get(segment))
}

/// Extracts the mapped fields of `record` in mapping order; absent paths
/// give null.
pub fn flatten(record: &Value, mappings: &[FieldMapping]) -> Vec<Value> {
    mappings
        .iter()
        .map(|m| lookup(record, m.path).cloned().unwrap_or(Value::Null))
        .collect()
}

pub fn columns_of(mappings: &[FieldMapping]) -> Vec<String> {
    mappings.iter().map(|m| m.column.to_string()).collect()
}
