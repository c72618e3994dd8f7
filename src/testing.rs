//! Test doubles and fixtures shared by unit tests.

use crate::model::RawRecord;
use crate::traits::{CatalogClient, FetchError, Page, PageHeader};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

type Hook = Box<dyn Fn(&str, usize) + Send + Sync>;

/// Catalog client that replays scripted responses per partition.
///
/// Once a partition's script is exhausted every call fails with a
/// permanent request error.
#[derive(Default)]
pub(crate) struct ScriptedClient {
    scripts: Mutex<HashMap<String, VecDeque<Result<Page, FetchError>>>>,
    calls: Mutex<Vec<(String, String)>>,
    hook: Option<Hook>,
}

impl ScriptedClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_pages(self, partition: &str, pages: Vec<Page>) -> Self {
        for page in pages {
            self.push(partition, Ok(page));
        }
        self
    }

    /// Runs `hook(partition, call_number)` before answering each call (1-based).
    pub(crate) fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, usize) + Send + Sync + 'static,
    {
        self.hook = Some(Box::new(hook));
        self
    }

    pub(crate) fn push(&self, partition: &str, response: Result<Page, FetchError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(partition.to_string())
            .or_default()
            .push_back(response);
    }

    /// Cursors requested for `partition`, in call order.
    pub(crate) fn cursors(&self, partition: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == partition)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

#[async_trait]
impl CatalogClient for ScriptedClient {
    async fn fetch_page(
        &self,
        partition: &str,
        cursor: &str,
        _page_size: usize,
    ) -> Result<Page, FetchError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((partition.to_string(), cursor.to_string()));
            calls.iter().filter(|(p, _)| p == partition).count()
        };
        if let Some(hook) = &self.hook {
            hook(partition, call);
        }
        self.scripts
            .lock()
            .unwrap()
            .get_mut(partition)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(FetchError::Request("script exhausted".to_string())))
    }
}

pub(crate) fn page(cursor: &str, next: &str, records: Vec<RawRecord>) -> Page {
    Page {
        records,
        header: PageHeader {
            cursor: Some(cursor.to_string()),
            next_cursor: Some(next.to_string()),
        },
    }
}

/// An active establishment in Paris 2e, legal unit created 2010-01-15.
pub(crate) fn raw_establishment(siret: &str, siren: &str) -> RawRecord {
    json!({
        "siren": siren,
        "nic": &siret[siret.len().saturating_sub(5)..],
        "siret": siret,
        "statutDiffusionEtablissement": "O",
        "dateCreationEtablissement": "2015-03-01",
        "trancheEffectifsEtablissement": "01",
        "anneeEffectifsEtablissement": "2021",
        "activitePrincipaleRegistreMetiersEtablissement": null,
        "etablissementSiege": true,
        "nombrePeriodesEtablissement": 2,
        "uniteLegale": {
            "etatAdministratifUniteLegale": "A",
            "statutDiffusionUniteLegale": "O",
            "dateCreationUniteLegale": "2010-01-15",
            "categorieJuridiqueUniteLegale": "5710",
            "denominationUniteLegale": format!("ENTREPRISE {siren}"),
            "sigleUniteLegale": null,
            "denominationUsuelle1UniteLegale": null,
            "activitePrincipaleUniteLegale": "43.22A",
            "categorieEntreprise": "PME",
            "trancheEffectifsUniteLegale": "11",
            "anneeEffectifsUniteLegale": "2021"
        },
        "adresseEtablissement": {
            "numeroVoieEtablissement": "12",
            "typeVoieEtablissement": "RUE",
            "libelleVoieEtablissement": "DE LA PAIX",
            "codePostalEtablissement": "75002",
            "libelleCommuneEtablissement": "PARIS 2",
            "codeCommuneEtablissement": "75102",
            "coordonneeLambertAbscisseEtablissement": "651523.5",
            "coordonneeLambertOrdonneeEtablissement": "6863197.2",
            "libellePaysEtrangerEtablissement": null
        },
        "periodesEtablissement": [
            {
                "dateFin": null,
                "dateDebut": "2018-01-01",
                "etatAdministratifEtablissement": "A",
                "activitePrincipaleEtablissement": "43.22A"
            },
            {
                "dateFin": "2017-12-31",
                "dateDebut": "2015-03-01",
                "etatAdministratifEtablissement": "A",
                "activitePrincipaleEtablissement": "43.21A"
            }
        ]
    })
}

/// Same as [`raw_establishment`] but closed (`F`) in its latest period.
pub(crate) fn closed_establishment(siret: &str, siren: &str) -> RawRecord {
    let mut record = raw_establishment(siret, siren);
    record["periodesEtablissement"][0]["etatAdministratifEtablissement"] = json!("F");
    record
}
