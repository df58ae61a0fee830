//! Transactional statement templates and table schemas.
//!
//! Each template is a fixed parametrized transaction block. Positional
//! parameters (`?`) are bound in textual order. Conditional blocks always
//! return the row observed *before* the guarded write so the caller can
//! tell whether the guard held.

/// Fixed statement shapes issued against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Template {
    /// `[id]` -> `[value]` or no row.
    CasRead,
    /// `[id, value, id]` -> `[prior value]`; updates only if the row exists.
    CasUpdateIfPresent,
    /// `[id, id, value]` -> `[prior value]`; inserts only if the row is absent.
    CasInsertIfAbsent,
    /// `[id, expected, new, id]` -> `[prior value]`; updates only on match.
    CasCompareAndSet,
    /// `[id]` -> `[value]` or no row.
    RwRead,
    /// `[id, id, value]` -> `[prior value]`; inserts only if absent.
    RwInsertIfAbsent,
    /// `[a, b]` -> `[value a, value b]`.
    RwReadTwo,
    /// `[a, b, value]` -> `[value a]`; writes `b` unconditionally.
    RwReadThenWrite,
    /// `[a, b, a, x, b, y]` -> `[prior a, prior b]`; writes both only if
    /// both are absent.
    RwWriteTwo,
    /// `[id]` -> `[contents]` or no row.
    ListRead,
    /// `[id, [value], id]` -> `[prior contents]`; appends only if absent.
    ListAppendIfAbsent,
}

pub const CAS_TABLE: &str = "cas_registers";
pub const RW_TABLE: &str = "rw_registers";
pub const LIST_TABLE: &str = "list_append";

impl Template {
    /// Statement text sent to the store.
    pub fn text(&self) -> &'static str {
        match self {
            Template::CasRead => {
                "BEGIN TRANSACTION\n\
                 \x20 SELECT value FROM cas_registers WHERE id = ?;\n\
                 COMMIT TRANSACTION"
            }
            Template::CasUpdateIfPresent => {
                "BEGIN TRANSACTION\n\
                 \x20 LET row1 = (SELECT value FROM cas_registers WHERE id = ?);\n\
                 \x20 SELECT row1.value;\n\
                 \x20 IF row1 IS NOT NULL THEN\n\
                 \x20   UPDATE cas_registers SET value = ? WHERE id = ?;\n\
                 \x20 END IF\n\
                 COMMIT TRANSACTION"
            }
            Template::CasInsertIfAbsent => {
                "BEGIN TRANSACTION\n\
                 \x20 LET row1 = (SELECT value FROM cas_registers WHERE id = ?);\n\
                 \x20 SELECT row1.value;\n\
                 \x20 IF row1 IS NULL THEN\n\
                 \x20   INSERT INTO cas_registers (id, value) VALUES (?, ?);\n\
                 \x20 END IF\n\
                 COMMIT TRANSACTION"
            }
            Template::CasCompareAndSet => {
                "BEGIN TRANSACTION\n\
                 \x20 LET row1 = (SELECT value FROM cas_registers WHERE id = ?);\n\
                 \x20 SELECT row1.value;\n\
                 \x20 IF row1.value = ? THEN\n\
                 \x20   UPDATE cas_registers SET value = ? WHERE id = ?;\n\
                 \x20 END IF\n\
                 COMMIT TRANSACTION"
            }
            Template::RwRead => {
                "BEGIN TRANSACTION\n\
                 \x20 SELECT value FROM rw_registers WHERE id = ?;\n\
                 COMMIT TRANSACTION"
            }
            Template::RwInsertIfAbsent => {
                "BEGIN TRANSACTION\n\
                 \x20 LET row1 = (SELECT value FROM rw_registers WHERE id = ?);\n\
                 \x20 SELECT row1.value;\n\
                 \x20 IF row1 IS NULL THEN\n\
                 \x20   INSERT INTO rw_registers (id, value) VALUES (?, ?);\n\
                 \x20 END IF\n\
                 COMMIT TRANSACTION"
            }
            Template::RwReadTwo => {
                "BEGIN TRANSACTION\n\
                 \x20 LET row1 = (SELECT value FROM rw_registers WHERE id = ?);\n\
                 \x20 LET row2 = (SELECT value FROM rw_registers WHERE id = ?);\n\
                 \x20 SELECT row1.value, row2.value;\n\
                 COMMIT TRANSACTION"
            }
            Template::RwReadThenWrite => {
                "BEGIN TRANSACTION\n\
                 \x20 LET row1 = (SELECT value FROM rw_registers WHERE id = ?);\n\
                 \x20 SELECT row1.value;\n\
                 \x20 INSERT INTO rw_registers (id, value) VALUES (?, ?);\n\
                 COMMIT TRANSACTION"
            }
            Template::RwWriteTwo => {
                "BEGIN TRANSACTION\n\
                 \x20 LET row1 = (SELECT value FROM rw_registers WHERE id = ?);\n\
                 \x20 LET row2 = (SELECT value FROM rw_registers WHERE id = ?);\n\
                 \x20 SELECT row1.value, row2.value;\n\
                 \x20 IF row1 IS NULL AND row2 IS NULL THEN\n\
                 \x20   INSERT INTO rw_registers (id, value) VALUES (?, ?);\n\
                 \x20   INSERT INTO rw_registers (id, value) VALUES (?, ?);\n\
                 \x20 END IF\n\
                 COMMIT TRANSACTION"
            }
            Template::ListRead => {
                "BEGIN TRANSACTION\n\
                 \x20 SELECT contents FROM list_append WHERE id = ?;\n\
                 COMMIT TRANSACTION"
            }
            Template::ListAppendIfAbsent => {
                "BEGIN TRANSACTION\n\
                 \x20 LET row1 = (SELECT contents FROM list_append WHERE id = ?);\n\
                 \x20 SELECT row1.contents;\n\
                 \x20 IF row1 IS NULL THEN\n\
                 \x20   UPDATE list_append SET contents += ? WHERE id = ?;\n\
                 \x20 END IF\n\
                 COMMIT TRANSACTION"
            }
        }
    }

    /// Number of positional parameters.
    pub fn arity(&self) -> usize {
        match self {
            Template::CasRead | Template::RwRead | Template::ListRead => 1,
            Template::RwReadTwo => 2,
            Template::CasUpdateIfPresent
            | Template::CasInsertIfAbsent
            | Template::RwInsertIfAbsent
            | Template::RwReadThenWrite
            | Template::ListAppendIfAbsent => 3,
            Template::CasCompareAndSet => 4,
            Template::RwWriteTwo => 6,
        }
    }

    /// Table the template reads and writes.
    pub fn table(&self) -> &'static str {
        match self {
            Template::CasRead
            | Template::CasUpdateIfPresent
            | Template::CasInsertIfAbsent
            | Template::CasCompareAndSet => CAS_TABLE,
            Template::RwRead
            | Template::RwInsertIfAbsent
            | Template::RwReadTwo
            | Template::RwReadThenWrite
            | Template::RwWriteTwo => RW_TABLE,
            Template::ListRead | Template::ListAppendIfAbsent => LIST_TABLE,
        }
    }
}

pub const CAS_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS cas_registers (\n\
    \x20 id int PRIMARY KEY,\n\
    \x20 value int\n\
    ) WITH transactional_mode = 'full';";

pub const RW_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS rw_registers (\n\
    \x20 id int PRIMARY KEY,\n\
    \x20 value bigint\n\
    ) WITH transactional_mode = 'full';";

pub const LIST_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS list_append (\n\
    \x20 id int PRIMARY KEY,\n\
    \x20 contents list<bigint>\n\
    ) WITH transactional_mode = 'full';";

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Template; 11] = [
        Template::CasRead,
        Template::CasUpdateIfPresent,
        Template::CasInsertIfAbsent,
        Template::CasCompareAndSet,
        Template::RwRead,
        Template::RwInsertIfAbsent,
        Template::RwReadTwo,
        Template::RwReadThenWrite,
        Template::RwWriteTwo,
        Template::ListRead,
        Template::ListAppendIfAbsent,
    ];

    #[test]
    fn test_arity_matches_placeholders() {
        for template in ALL {
            let placeholders = template.text().matches('?').count();
            assert_eq!(placeholders, template.arity(), "{:?}", template);
        }
    }

    #[test]
    fn test_templates_are_transaction_blocks() {
        for template in ALL {
            let text = template.text();
            assert!(text.starts_with("BEGIN TRANSACTION"), "{:?}", template);
            assert!(text.ends_with("COMMIT TRANSACTION"), "{:?}", template);
            assert!(text.contains(template.table()), "{:?}", template);
        }
    }

    #[test]
    fn test_guarded_templates_select_prior_row() {
        for template in [
            Template::CasUpdateIfPresent,
            Template::CasInsertIfAbsent,
            Template::CasCompareAndSet,
            Template::RwInsertIfAbsent,
            Template::RwWriteTwo,
            Template::ListAppendIfAbsent,
        ] {
            let text = template.text();
            let select = text.find("SELECT row1").unwrap();
            let guard = text.find("IF ").unwrap();
            assert!(select < guard, "{:?}", template);
        }
    }
}
