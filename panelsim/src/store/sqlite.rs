use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{CircuitRepository, NewCircuit, Result, StoreError};
use crate::circuit::{
    validate_draft, Circuit, CircuitId, ClientId, Component, ComponentKind, Conductor,
    Connection as CircuitConnection, OrgId, PositionHint, RatedAttributes,
};
use crate::simulation::SimulationResult;

/// SQLite-backed [`CircuitRepository`]. One connection behind a mutex; each
/// write runs in its own transaction.
pub struct SqliteCircuitStore {
    conn: Mutex<Connection>,
}

impl SqliteCircuitStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        tracing::debug!("Opened circuit store at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.initialize()?;
        Ok(store)
    }

    fn get_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS circuits (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                organization_id TEXT NOT NULL,
                client_id TEXT,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_circuits_org
             ON circuits(organization_id, created_at)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS circuit_components (
                circuit_id INTEGER NOT NULL REFERENCES circuits(id) ON DELETE CASCADE,
                ordinal INTEGER NOT NULL,
                component_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                rated_json TEXT NOT NULL,
                label TEXT,
                page INTEGER,
                x REAL,
                y REAL,
                PRIMARY KEY (circuit_id, component_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS circuit_connections (
                circuit_id INTEGER NOT NULL REFERENCES circuits(id) ON DELETE CASCADE,
                ordinal INTEGER NOT NULL,
                connection_id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                conductor_json TEXT,
                PRIMARY KEY (circuit_id, connection_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS simulations (
                id TEXT PRIMARY KEY,
                circuit_id INTEGER NOT NULL REFERENCES circuits(id) ON DELETE CASCADE,
                organization_id TEXT NOT NULL,
                computed_at TEXT NOT NULL,
                status TEXT NOT NULL,
                result_json TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_simulations_circuit
             ON simulations(organization_id, circuit_id, computed_at)",
            [],
        )?;

        Ok(())
    }

    /// Circuit ids of `org`, optionally narrowed to a client, most recent
    /// first
    fn circuit_ids(
        conn: &Connection,
        org: &OrgId,
        client: Option<&ClientId>,
    ) -> Result<Vec<CircuitId>> {
        let mut stmt = conn.prepare(
            "SELECT id FROM circuits
             WHERE organization_id = ?1 AND (?2 IS NULL OR client_id = ?2)
             ORDER BY created_at DESC, id DESC",
        )?;
        let ids = stmt
            .query_map(params![org.as_str(), client.map(ClientId::as_str)], |row| {
                Ok(CircuitId(row.get(0)?))
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(ids)
    }

    fn load_circuit(conn: &Connection, id: CircuitId, org: &OrgId) -> Result<Circuit> {
        let header = conn
            .query_row(
                "SELECT id, organization_id, client_id, name, created_at, updated_at
                 FROM circuits
                 WHERE id = ?1 AND organization_id = ?2",
                params![id.0, org.as_str()],
                |row| {
                    Ok(Circuit {
                        id: CircuitId(row.get(0)?),
                        organization_id: OrgId::new(row.get::<_, String>(1)?),
                        client_id: row.get::<_, Option<String>>(2)?.map(ClientId::new),
                        name: row.get(3)?,
                        components: Vec::new(),
                        connections: Vec::new(),
                        created_at: timestamp(row, 4)?,
                        updated_at: timestamp(row, 5)?,
                    })
                },
            )
            .optional()?;
        let mut circuit = header.ok_or_else(|| StoreError::circuit_not_found(id))?;

        let mut stmt = conn.prepare(
            "SELECT cc.component_id, cc.kind, cc.rated_json, cc.label, cc.page, cc.x, cc.y
             FROM circuit_components cc
             JOIN circuits c ON c.id = cc.circuit_id
             WHERE cc.circuit_id = ?1 AND c.organization_id = ?2
             ORDER BY cc.ordinal",
        )?;
        circuit.components = stmt
            .query_map(params![id.0, org.as_str()], component_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        let mut stmt = conn.prepare(
            "SELECT cn.connection_id, cn.source_id, cn.target_id, cn.conductor_json
             FROM circuit_connections cn
             JOIN circuits c ON c.id = cn.circuit_id
             WHERE cn.circuit_id = ?1 AND c.organization_id = ?2
             ORDER BY cn.ordinal",
        )?;
        circuit.connections = stmt
            .query_map(params![id.0, org.as_str()], |row| {
                let conductor_json: Option<String> = row.get(3)?;
                let conductor = conductor_json
                    .map(|json| serde_json::from_str::<Conductor>(&json))
                    .transpose()
                    .map_err(|e| json_column_error(3, e))?;
                Ok(CircuitConnection {
                    id: row.get(0)?,
                    source: row.get(1)?,
                    target: row.get(2)?,
                    conductor,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(circuit)
    }

    fn owns_circuit(conn: &Connection, id: CircuitId, org: &OrgId) -> Result<bool> {
        let found = conn
            .query_row(
                "SELECT 1 FROM circuits WHERE id = ?1 AND organization_id = ?2",
                params![id.0, org.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn load_simulations(
        conn: &Connection,
        org: &OrgId,
        circuit: CircuitId,
    ) -> Result<Vec<SimulationResult>> {
        let mut stmt = conn.prepare(
            "SELECT result_json FROM simulations
             WHERE organization_id = ?1 AND circuit_id = ?2
             ORDER BY computed_at DESC, rowid DESC",
        )?;
        let rows = stmt
            .query_map(params![org.as_str(), circuit.0], |row| row.get::<_, String>(0))?
            .collect::<SqlResult<Vec<_>>>()?;
        rows.iter().map(|json| decode_result(json)).collect()
    }
}

impl CircuitRepository for SqliteCircuitStore {
    fn create(&self, org: &OrgId, new: NewCircuit) -> Result<Circuit> {
        let mut problems = Vec::new();
        if org.as_str().trim().is_empty() {
            problems.push("organization id is empty".to_string());
        }
        if let Err(mut found) = validate_draft(&new.draft) {
            problems.append(&mut found);
        }
        if !problems.is_empty() {
            return Err(StoreError::ValidationFailed(problems));
        }

        let NewCircuit { draft, client_id } = new;
        let now = Utc::now();
        let stamp = format_timestamp(&now);

        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO circuits (organization_id, client_id, name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![
                org.as_str(),
                client_id.as_ref().map(ClientId::as_str),
                draft.name,
                stamp
            ],
        )?;
        let id = CircuitId(tx.last_insert_rowid());

        for (ordinal, component) in draft.components.iter().enumerate() {
            let rated_json = serde_json::to_string(&component.rated).map_err(|e| {
                StoreError::Serialization(format!("Failed to serialize attributes: {}", e))
            })?;
            let position = component.position;
            tx.execute(
                "INSERT INTO circuit_components
                 (circuit_id, ordinal, component_id, kind, rated_json, label, page, x, y)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id.0,
                    ordinal as i64,
                    component.id,
                    component.kind.as_str(),
                    rated_json,
                    component.label,
                    position.map(|p| p.page),
                    position.map(|p| p.x),
                    position.map(|p| p.y),
                ],
            )?;
        }

        for (ordinal, connection) in draft.connections.iter().enumerate() {
            let conductor_json = connection
                .conductor
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| {
                    StoreError::Serialization(format!("Failed to serialize conductor: {}", e))
                })?;
            tx.execute(
                "INSERT INTO circuit_connections
                 (circuit_id, ordinal, connection_id, source_id, target_id, conductor_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.0,
                    ordinal as i64,
                    connection.id,
                    connection.source,
                    connection.target,
                    conductor_json,
                ],
            )?;
        }

        tx.commit()?;
        tracing::info!(
            "Stored circuit {} '{}' for organization {} ({} components, {} connections)",
            id,
            draft.name,
            org,
            draft.components.len(),
            draft.connections.len()
        );

        Ok(Circuit {
            id,
            organization_id: org.clone(),
            client_id,
            name: draft.name,
            components: draft.components,
            connections: draft.connections,
            created_at: now,
            updated_at: now,
        })
    }

    fn list_by_organization(&self, org: &OrgId) -> Result<Vec<Circuit>> {
        let conn = self.get_conn()?;
        Self::circuit_ids(&conn, org, None)?
            .into_iter()
            .map(|id| Self::load_circuit(&conn, id, org))
            .collect()
    }

    fn list_by_client(&self, org: &OrgId, client: &ClientId) -> Result<Vec<Circuit>> {
        let conn = self.get_conn()?;
        Self::circuit_ids(&conn, org, Some(client))?
            .into_iter()
            .map(|id| Self::load_circuit(&conn, id, org))
            .collect()
    }

    fn get_by_id(&self, id: CircuitId, org: &OrgId) -> Result<Circuit> {
        let conn = self.get_conn()?;
        Self::load_circuit(&conn, id, org)
    }

    fn detach_client(&self, org: &OrgId, client: &ClientId) -> Result<usize> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE circuits SET client_id = NULL, updated_at = ?3
             WHERE organization_id = ?1 AND client_id = ?2",
            params![org.as_str(), client.as_str(), format_timestamp(&Utc::now())],
        )?;
        tracing::info!(
            "Detached client {} from {} circuits of organization {}",
            client,
            updated,
            org
        );
        Ok(updated)
    }

    fn save_simulation(&self, org: &OrgId, result: &SimulationResult) -> Result<()> {
        if !result.is_finite() {
            return Err(StoreError::Serialization(format!(
                "Simulation result {} contains non-finite values",
                result.id
            )));
        }
        let result_json = serde_json::to_string(result).map_err(|e| {
            StoreError::Serialization(format!("Failed to serialize simulation result: {}", e))
        })?;

        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        if !Self::owns_circuit(&tx, result.circuit_id, org)? {
            return Err(StoreError::circuit_not_found(result.circuit_id));
        }
        tx.execute(
            "INSERT INTO simulations (id, circuit_id, organization_id, computed_at, status, result_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                result.id.to_string(),
                result.circuit_id.0,
                org.as_str(),
                format_timestamp(&result.computed_at),
                result.status.to_string(),
                result_json,
            ],
        )?;
        tx.commit()?;

        tracing::debug!(
            "Saved simulation {} for circuit {}",
            result.id,
            result.circuit_id
        );
        Ok(())
    }

    fn get_simulation(&self, org: &OrgId, id: Uuid) -> Result<SimulationResult> {
        let conn = self.get_conn()?;
        let json = conn
            .query_row(
                "SELECT result_json FROM simulations WHERE id = ?1 AND organization_id = ?2",
                params![id.to_string(), org.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound {
                entity: "simulation",
                id: id.to_string(),
            })?;
        decode_result(&json)
    }

    fn list_simulations(&self, org: &OrgId, circuit: CircuitId) -> Result<Vec<SimulationResult>> {
        let conn = self.get_conn()?;
        if !Self::owns_circuit(&conn, circuit, org)? {
            return Err(StoreError::circuit_not_found(circuit));
        }
        Self::load_simulations(&conn, org, circuit)
    }
}

fn component_from_row(row: &Row<'_>) -> SqlResult<Component> {
    let kind_text: String = row.get(1)?;
    let kind = ComponentKind::parse(&kind_text).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(
            1,
            format!("Unknown component kind '{}'", kind_text),
            rusqlite::types::Type::Text,
        )
    })?;
    let rated_json: String = row.get(2)?;
    let rated: RatedAttributes =
        serde_json::from_str(&rated_json).map_err(|e| json_column_error(2, e))?;

    let page: Option<u32> = row.get(4)?;
    let x: Option<f64> = row.get(5)?;
    let y: Option<f64> = row.get(6)?;
    let position = match (page, x, y) {
        (Some(page), Some(x), Some(y)) => Some(PositionHint::new(page, x, y)),
        _ => None,
    };

    Ok(Component {
        id: row.get(0)?,
        kind,
        rated,
        label: row.get(3)?,
        position,
    })
}

fn decode_result(json: &str) -> Result<SimulationResult> {
    serde_json::from_str(json).map_err(|e| {
        StoreError::Serialization(format!("Failed to deserialize simulation result: {}", e))
    })
}

fn json_column_error(column: usize, e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(
        column,
        format!("Failed to deserialize column: {}", e),
        rusqlite::types::Type::Text,
    )
}

/// Fixed-width RFC 3339 in UTC, so text order matches time order
fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn timestamp(row: &Row<'_>, column: usize) -> SqlResult<DateTime<Utc>> {
    let text: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::InvalidColumnType(
                column,
                format!("Invalid timestamp '{}': {}", text, e),
                rusqlite::types::Type::Text,
            )
        })
}

// Helper trait for optional query results
trait OptionalResult<T> {
    fn optional(self) -> SqlResult<Option<T>>;
}

impl<T> OptionalResult<T> for SqlResult<T> {
    fn optional(self) -> SqlResult<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
