/// Renders the bootstrap DDL as individually executable statements. The
/// source files use psql's `\ir` include directive so the same SQL works
/// from the command line.
pub fn render_statements() -> Vec<String> {
	expand_includes(include_str!("../sql/init.sql"))
		.split(';')
		.map(str::trim)
		.filter(|statement| !statement.is_empty())
		.map(str::to_string)
		.collect()
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"tables/001_profiles.sql" =>
					out.push_str(include_str!("../sql/tables/001_profiles.sql")),
				"tables/002_profile_history.sql" =>
					out.push_str(include_str!("../sql/tables/002_profile_history.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}
