//! `Engine` methods for §6's "Project operations" and "Content operations"
//! groups — thin wrappers over [`crate::query`] and [`crate::blob`] that
//! resolve a slug to a `ProjectId` once, at the facade boundary.

use pmdb_core::{
    Error, FileListEntry, Payload, ProjectDetail, ProjectId, ProjectRow, ProjectSummary, Result,
};

use crate::engine::Engine;
use crate::{blob, query};

impl Engine {
    pub fn get_project(&self, slug: &str) -> Result<ProjectRow> {
        self.with_connection(|conn| query::get_project_by_slug(conn, slug))
    }

    pub fn get_project_detail(&self, slug: &str) -> Result<ProjectDetail> {
        self.with_connection(|conn| query::get_project_detail(conn, slug))
    }

    pub fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        self.with_connection(query::list_projects)
    }

    pub fn delete_project(&self, slug: &str) -> Result<()> {
        self.with_txn(|conn| query::delete_project(conn, slug))
    }

    pub(crate) fn project_id(&self, slug: &str) -> Result<ProjectId> {
        self.with_connection(|conn| query::get_project_by_slug(conn, slug).map(|p| p.id))
    }

    /// `file.get_current(project, path) → (hash, bytes, kind, version)`.
    pub fn get_current_content(
        &self,
        slug: &str,
        path: &str,
    ) -> Result<(String, Payload, pmdb_core::ContentKind, i64)> {
        self.with_connection(|conn| {
            let project = query::get_project_by_slug(conn, slug)?;
            let (_, hash, version, _) = query::get_current_file(conn, project.id, path)?;
            let (payload, kind, _encoding) = blob::get(conn, &hash, self.config.blob_verify_on_read)?;
            Ok((hash, payload, kind, version))
        })
    }

    pub fn list_files(&self, slug: &str, glob: Option<&str>) -> Result<Vec<FileListEntry>> {
        self.with_connection(|conn| {
            let project = query::get_project_by_slug(conn, slug)?;
            query::list_files(conn, project.id, glob)
        })
    }

    /// `blob.get(hash) → (bytes, kind, encoding)`. Not project-scoped —
    /// blobs are content-addressed globally, per the data model.
    pub fn get_blob(
        &self,
        content_hash: &str,
    ) -> Result<(Payload, pmdb_core::ContentKind, Option<String>)> {
        self.with_connection(|conn| blob::get(conn, content_hash, self.config.blob_verify_on_read))
    }

    pub fn blob_exists(&self, content_hash: &str) -> Result<bool> {
        self.with_connection(|conn| blob::exists(conn, content_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmdb_core::EngineConfig;

    #[test]
    fn get_project_not_found_is_distinct_from_io_error() {
        let engine = Engine::open_in_memory().unwrap();
        let err = engine.get_project("nope").unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn list_projects_empty_initially() {
        let engine = Engine::open_in_memory().unwrap();
        assert!(engine.list_projects().unwrap().is_empty());
    }

    #[test]
    fn blob_get_missing_is_not_found() {
        let engine = Engine::open_in_memory().unwrap();
        let _ = EngineConfig::default();
        let err = engine.get_blob("deadbeef").unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
