//! Category directory

use rusqlite::{params, OptionalExtension};

use super::Database;
use crate::error::Result;
use crate::models::Category;

const CATEGORY_COLUMNS: &str = "id, name, icon, color, is_income";

impl Database {
    /// Seed the default category set (idempotent)
    pub fn seed_default_categories(&self) -> Result<()> {
        let conn = self.conn()?;

        // (name, icon, color, is_income)
        let defaults = [
            ("Salary", "💼", "#22c55e", true),
            ("Other Income", "💰", "#16a34a", true),
            ("Refunds", "↩️", "#4ade80", true),
            ("Groceries", "🛒", "#10b981", false),
            ("Food & Dining", "🍽️", "#f59e0b", false),
            ("Transport", "🚗", "#ef4444", false),
            ("Utilities", "💡", "#8b5cf6", false),
            ("Housing", "🏠", "#6366f1", false),
            ("Home & Garden", "🔨", "#84cc16", false),
            ("Shopping", "🛍️", "#14b8a6", false),
            ("Entertainment", "🎬", "#f97316", false),
            ("Healthcare", "🩺", "#ec4899", false),
            ("Bank Fees", "🏦", "#64748b", false),
            ("Business Expenses", "📎", "#0ea5e9", false),
            ("Other", "📦", "#9ca3af", false),
        ];

        for (name, icon, color, is_income) in &defaults {
            conn.execute(
                "INSERT OR IGNORE INTO categories (name, icon, color, is_income) VALUES (?, ?, ?, ?)",
                params![name, icon, color, is_income],
            )?;
        }

        Ok(())
    }

    /// Create a category, returning its ID
    pub fn create_category(&self, name: &str, is_income: bool) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO categories (name, is_income) VALUES (?, ?)",
            params![name, is_income],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// List all categories
    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM categories ORDER BY is_income DESC, name",
            CATEGORY_COLUMNS
        ))?;
        let categories = stmt
            .query_map([], Self::row_to_category)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    /// List categories on one side of the income partition
    pub fn list_categories_by_income(&self, is_income: bool) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM categories WHERE is_income = ? ORDER BY name",
            CATEGORY_COLUMNS
        ))?;
        let categories = stmt
            .query_map(params![is_income], Self::row_to_category)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    /// Get a category by ID
    pub fn get_category(&self, id: i64) -> Result<Option<Category>> {
        let conn = self.conn()?;
        let category = conn
            .query_row(
                &format!("SELECT {} FROM categories WHERE id = ?", CATEGORY_COLUMNS),
                params![id],
                Self::row_to_category,
            )
            .optional()?;
        Ok(category)
    }

    /// Find a category by name (case-insensitive)
    pub fn find_category_by_name(&self, name: &str) -> Result<Option<Category>> {
        let conn = self.conn()?;
        let category = conn
            .query_row(
                &format!(
                    "SELECT {} FROM categories WHERE name = ? COLLATE NOCASE",
                    CATEGORY_COLUMNS
                ),
                params![name.trim()],
                Self::row_to_category,
            )
            .optional()?;
        Ok(category)
    }

    fn row_to_category(row: &rusqlite::Row) -> rusqlite::Result<Category> {
        Ok(Category {
            id: row.get(0)?,
            name: row.get(1)?,
            icon: row.get(2)?,
            color: row.get(3)?,
            is_income: row.get(4)?,
        })
    }
}
