//! List command implementation.

use entidal_core::{ListOptions, ListResult, Runtime};
use entidal_storage::{Criteria, Repo, SortField};

/// Query arguments of the list command.
#[derive(Debug, Default)]
pub struct ListArgs {
    /// Criteria in their JSON wire form.
    pub criteria: Option<String>,
    /// Sort keys, `field` or `field:desc`.
    pub sort: Vec<String>,
    /// Fields to include.
    pub fields: Vec<String>,
    /// 1-based page number.
    pub page: u64,
    /// Page size.
    pub page_size: Option<i64>,
    /// Read the trash.
    pub trash: bool,
}

/// Parses `field` or `field:asc|desc`.
pub fn parse_sort(spec: &str) -> Result<SortField, String> {
    match spec.split_once(':') {
        None => Ok(SortField::asc(spec)),
        Some((field, "asc")) => Ok(SortField::asc(field)),
        Some((field, "desc")) => Ok(SortField::desc(field)),
        Some((_, order)) => Err(format!("Unknown sort order {order:?}")),
    }
}

/// Builds list options from command arguments.
pub fn list_options(args: &ListArgs) -> Result<ListOptions, Box<dyn std::error::Error>> {
    let criteria = match &args.criteria {
        Some(text) => Criteria::from_json(&serde_json::from_str(text)?),
        None => Criteria::All,
    };
    let mut options = ListOptions::new(criteria).included_fields(args.fields.iter().cloned());
    for spec in &args.sort {
        options = options.sort_by(parse_sort(spec)?);
    }
    options.page_no = Some(args.page);
    options.page_size = args.page_size;
    if args.trash {
        options = options.repo(Repo::Trash);
    }
    Ok(options)
}

/// Runs the list command.
pub fn run(
    runtime: &Runtime,
    entity: &str,
    args: &ListArgs,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = runtime.service().list(entity, &list_options(args)?)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(entity, &result)?,
    }
    Ok(())
}

fn print_text_output(entity: &str, result: &ListResult) -> Result<(), Box<dyn std::error::Error>> {
    for row in &result.rows {
        println!("{}", serde_json::to_string(row)?);
    }
    match result.total {
        Some(total) => println!(
            "{entity}: page {} ({} rows of {total})",
            result.page_no,
            result.rows.len()
        ),
        None => println!("{entity}: {} rows", result.rows.len()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use entidal_storage::SortOrder;

    #[test]
    fn sort_specs() {
        assert_eq!(parse_sort("age").unwrap().order, SortOrder::Asc);
        let desc = parse_sort("_modifiedOn:desc").unwrap();
        assert_eq!(desc.field, "_modifiedOn");
        assert_eq!(desc.order, SortOrder::Desc);
        assert!(parse_sort("age:sideways").is_err());
    }

    #[test]
    fn options_from_args() {
        let args = ListArgs {
            criteria: Some(r#"{"field": "age", "operator": ">", "value": 3}"#.into()),
            sort: vec!["age:desc".into()],
            fields: vec!["name".into()],
            page: 2,
            page_size: Some(5),
            trash: true,
        };
        let options = list_options(&args).unwrap();
        assert!(!options.criteria.is_all());
        assert_eq!(options.sort.len(), 1);
        assert_eq!(options.included_fields, vec!["name".to_string()]);
        assert_eq!(options.page_no, Some(2));
        assert_eq!(options.page_size, Some(5));
        assert_eq!(options.repo, Repo::Trash);
    }

    #[test]
    fn bad_criteria_json_is_rejected() {
        let args = ListArgs {
            criteria: Some("{not json".into()),
            ..ListArgs::default()
        };
        assert!(list_options(&args).is_err());
    }
}
