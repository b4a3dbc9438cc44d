use super::*;
use time::macros::date;

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("reviewdash").chain(args.iter().copied())).unwrap()
}

#[test]
fn reviews_flags_build_filter_in_order() {
    let cli = parse(&["reviews", "mr", "--author", "alice", "--author", "bob", "--start-date", "2024-01-01"]);
    let Command::Reviews { kind, filter, table } = cli.command else {
        panic!("expected reviews command");
    };
    assert_eq!(kind, KindArg::Mr);
    assert!(!table);
    assert_eq!(filter.into_filter().to_query().encode(), "authors=alice&authors=bob&start_date=2024-01-01");
}

#[test]
fn zero_page_is_rejected() {
    assert!(Cli::try_parse_from(["reviewdash", "reviews", "push", "--page", "0"]).is_err());
}

#[test]
fn stats_default_to_last_week() {
    let filter = StatsArgs::default().into_filter(date!(2024-03-05));
    assert_eq!(filter.start_date.as_deref(), Some("2024-02-27"));
    assert_eq!(filter.end_date.as_deref(), Some("2024-03-05"));
}

#[test]
fn stats_keep_explicit_dates() {
    let args = StatsArgs { start_date: Some("2024-01-01".into()), end_date: None, kind: Some(KindArg::Push) };
    let filter = args.into_filter(date!(2024-03-05));
    assert_eq!(filter.to_query().encode(), "start_date=2024-01-01&type=push");
}

#[test]
fn data_commands_map_to_guarded_pages() {
    assert_eq!(page_for(&parse(&["logs", "push", "--all"]).command), Some("/admin/reviews/push"));
    assert_eq!(page_for(&parse(&["stats", "raw", "author_counts"]).command), Some("/admin/statistics"));
    assert_eq!(page_for(&parse(&["config"]).command), Some("/admin/settings"));
    assert_eq!(page_for(&parse(&["status"]).command), None);
}

#[test]
fn login_commands_start_on_login_route() {
    let config = ClientConfig::new("http://localhost:5001").unwrap();
    let cli = parse(&["login", "--username", "alice", "--password", "pw"]);
    assert_eq!(start_path(&cli.command, &config), "/login");
    assert_eq!(start_path(&parse(&["projects"]).command, &config), "/admin/dashboard");
}
