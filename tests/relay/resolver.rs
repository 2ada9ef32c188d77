//! Destination compilation

use news_relay::article::Headers;
use news_relay::resolver::{DestinationStatus, GroupResolver};
use news_relay::tables::{AssocList, GroupTables};
use news_relay::ActiveGroups;

const ACTIVE: &str = "\
comp.lang.rust 0 1 y
comp.std.c 0 1 m
nj.general 0 1 y
misc.test 0 1 y
comp.junk 0 1 y
old.name 0 1 =comp.lang.rust
";

fn headers(groups: &[&str], distribution: Option<&str>) -> Headers {
    let mut h = Headers::new("a@alice", groups.iter().map(|g| g.to_string()).collect(), "s");
    h.message_id = "<1@alice>".into();
    h.distribution = distribution.map(str::to_string);
    h
}

fn tables() -> GroupTables {
    GroupTables {
        aliases: AssocList::parse("net.lang.rust comp.lang.rust\n"),
        distributions: AssocList::parse("nj New Jersey\n"),
        ..GroupTables::default()
    }
}

#[test]
fn test_compile_is_deterministic() {
    let active = ActiveGroups::parse(ACTIVE);
    let tables = tables();
    let resolver = GroupResolver::new(&active, &tables);
    let h = headers(&["comp.lang.rust", "net.lang.rust", "nj.misc.test", "alt.nowhere"], None);
    assert_eq!(resolver.compile(&h), resolver.compile(&h));
}

#[test]
fn test_slots_follow_header_order() {
    let active = ActiveGroups::parse(ACTIVE);
    let tables = tables();
    let compiled = GroupResolver::new(&active, &tables)
        .compile(&headers(&["net.lang.rust", "old.name", "comp.lang.cobol", "alt.nowhere"], None));

    let names: Vec<&str> = compiled.destinations.iter().map(|d| d.name()).collect();
    assert_eq!(names, ["comp.lang.rust", "comp.lang.rust", "comp.junk", "alt.nowhere"]);
    assert_eq!(compiled.destinations[3].status, DestinationStatus::Unknown);
    assert_eq!(compiled.distribution, "world");
}

#[test]
fn test_distribution_prefix() {
    let active = ActiveGroups::parse(ACTIVE);
    let tables = tables();
    let compiled = GroupResolver::new(&active, &tables).compile(&headers(&["nj.misc.test"], Some("nj")));
    let dest = &compiled.destinations[0];
    assert_eq!(dest.name(), "misc.test");
    assert_eq!(dest.distribution_prefix.as_deref(), Some("nj"));
    assert_eq!(compiled.distribution, "nj");
}

#[test]
fn test_control_forced_to_control_group() {
    let active = ActiveGroups::parse(ACTIVE);
    let tables = tables();
    let mut h = headers(&["misc.test"], None);
    h.control = Some("cancel <2@alice>".into());
    let compiled = GroupResolver::new(&active, &tables).compile(&h);
    assert!(compiled.control);
    assert_eq!(compiled.newsgroups, ["control"]);

    let h = headers(&["misc.ctl"], None);
    assert!(GroupResolver::new(&active, &tables).compile(&h).control);
}

#[test]
fn test_obsolete_net_distribution() {
    let active = ActiveGroups::parse(ACTIVE);
    let tables = tables();
    let compiled = GroupResolver::new(&active, &tables).compile(&headers(&["misc.test"], Some("net")));
    assert_eq!(compiled.distribution, "world");
}

#[test]
fn test_redirect_to_inactive_group_takes_no_slot() {
    let active = ActiveGroups::parse("misc.test 0 1 y\ngone.away 0 1 =comp.retired\n");
    let tables = GroupTables {
        aliases: AssocList::parse("net.test misc.retired\n"),
        buggroups: AssocList::parse("comp.bugs comp.bugs.misc\n"),
        ..GroupTables::default()
    };
    let compiled = GroupResolver::new(&active, &tables).compile(&headers(
        &["net.test", "gone.away", "comp.bugs.4bsd", "misc.test"],
        None,
    ));

    let names: Vec<&str> = compiled.destinations.iter().map(|d| d.name()).collect();
    assert_eq!(names, ["misc.test"]);
}
