/// Schema version compiled into the binary. Bumped whenever a migration
/// changes the table layout in a way old rows can't be reinterpreted as.
/// Compared against the `meta` table's `schema_version` row at startup; a
/// mismatch is a fatal `ConfigMismatch` (§3, §7) rather than a silent
/// best-effort read.
pub const SCHEMA_VERSION: i64 = 1;
