use sqlx::{sqlite::SqliteRow, Row};

use kcart_core::domain::knowledge::{KnowledgeSnippet, SnippetId};
use kcart_core::domain::product::ProductId;

use super::{KnowledgeRepository, RepositoryError};
use crate::DbPool;

pub struct SqlKnowledgeRepository {
    pool: DbPool,
}

impl SqlKnowledgeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl KnowledgeRepository for SqlKnowledgeRepository {
    async fn save(&self, snippet: KnowledgeSnippet) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO knowledge_snippets (id, product_id, question, answer, language)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                product_id = excluded.product_id,
                question = excluded.question,
                answer = excluded.answer,
                language = excluded.language",
        )
        .bind(&snippet.id.0)
        .bind(snippet.product_id.as_ref().map(|id| id.0.as_str()))
        .bind(&snippet.question)
        .bind(&snippet.answer)
        .bind(&snippet.language)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &SnippetId,
    ) -> Result<Option<KnowledgeSnippet>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, product_id, question, answer, language
             FROM knowledge_snippets
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(snippet_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<KnowledgeSnippet>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, product_id, question, answer, language
             FROM knowledge_snippets
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(snippet_from_row).collect()
    }

    async fn list_for_product(
        &self,
        product_id: &ProductId,
    ) -> Result<Vec<KnowledgeSnippet>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, product_id, question, answer, language
             FROM knowledge_snippets
             WHERE product_id = ?
             ORDER BY id ASC",
        )
        .bind(&product_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(snippet_from_row).collect()
    }
}

fn snippet_from_row(row: SqliteRow) -> Result<KnowledgeSnippet, RepositoryError> {
    Ok(KnowledgeSnippet {
        id: SnippetId(row.try_get("id")?),
        product_id: row.try_get::<Option<String>, _>("product_id")?.map(ProductId),
        question: row.try_get("question")?,
        answer: row.try_get("answer")?,
        language: row.try_get("language")?,
    })
}
