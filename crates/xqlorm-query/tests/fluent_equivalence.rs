use proptest::prelude::*;
use xqlorm_core::{EntityModel, EntityRegistry, PropertyModel, StandardDialect};
use xqlorm_query::{Expr, JoinKind, PropertyRef, Query, SqlGenerator, Statement};

fn registry() -> EntityRegistry {
    EntityRegistry::new()
        .with(
            EntityModel::new("User", "users")
                .property(PropertyModel::integer("id").primary_key().auto_increment())
                .property(PropertyModel::string("name", 64).field("user_name"))
                .property(PropertyModel::date("born"))
                .property(PropertyModel::boolean("active"))
                .property(PropertyModel::integer("groupId").field("group_id")),
        )
        .with(
            EntityModel::new("Group", "groups")
                .property(PropertyModel::integer("id").primary_key())
                .property(PropertyModel::string("title", 64)),
        )
}

fn generate(query: &Query) -> (Statement, Statement) {
    let registry = registry();
    let dialect = StandardDialect::default();
    let generator = SqlGenerator::new(&registry, &dialect);
    (
        generator.select(query.model()).unwrap(),
        generator.count(query.model()).unwrap(),
    )
}

fn assert_equivalent(fluent: Query, text: &str) {
    let parsed = Query::parse(text).unwrap();
    let (fluent_select, fluent_count) = generate(&fluent);
    let (parsed_select, parsed_count) = generate(&parsed);

    assert_eq!(fluent_select.sql, parsed_select.sql);
    assert_eq!(fluent_count.sql, parsed_count.sql);
    assert_eq!(
        fluent_select.parameters.keys().collect::<Vec<_>>(),
        parsed_select.parameters.keys().collect::<Vec<_>>()
    );
}

#[test]
fn test_full_query_equivalence() {
    let fluent = Query::new()
        .select("u")
        .from_as("User", "u")
        .join(
            JoinKind::Left,
            "Group",
            "g",
            &[(PropertyRef::new("u", "groupId"), PropertyRef::new("g", "id"))],
        )
        .where_expr(
            Expr::prop("u", "name")
                .eq(Expr::param("name"))
                .and(Expr::group(
                    Expr::prop("g", "title").like(Expr::string("a%")).or(Expr::prop("u", "active").eq(Expr::bool(true))),
                ))
                .and(Expr::prop("u", "born").ne(Expr::null())),
        )
        .filter_like("g", "title", "title")
        .filter_between("u", "born", "born")
        .order_by("u", "name", true)
        .order_by("g", "title", false);

    assert_equivalent(
        fluent,
        "select u from User u left join Group g on u.groupId == g.id \
         where u.name == :name && (g.title like 'a%' || u.active == true) && u.born != null \
         filter g.title like :title filter u.born between :born \
         order by u.name descending, g.title",
    );
}

const PROPERTIES: [&str; 4] = ["id", "name", "born", "active"];
const OPERATORS: [(&str, fn(Expr, Expr) -> Expr); 6] = [
    ("==", Expr::eq),
    ("!=", Expr::ne),
    (">", Expr::gt),
    (">=", Expr::ge),
    ("<", Expr::lt),
    ("<=", Expr::le),
];

fn comparison() -> impl Strategy<Value = (usize, usize, usize)> {
    (0..PROPERTIES.len(), 0..OPERATORS.len(), 0..3usize)
}

proptest! {
    #[test]
    fn prop_fluent_and_parsed_generate_same_sql(
        comparisons in prop::collection::vec(comparison(), 1..5),
        disjunction in any::<bool>(),
        like_filter in any::<bool>(),
        descending in proptest::option::of(any::<bool>()),
    ) {
        let mut text = String::from("from User u where ");
        let mut expr: Option<Expr> = None;

        for (i, (property, operator, param)) in comparisons.iter().enumerate() {
            let (symbol, build) = OPERATORS[*operator];
            let property = PROPERTIES[*property];
            let param = format!("p{param}");

            if i > 0 {
                text.push_str(if disjunction { " || " } else { " && " });
            }
            text.push_str(&format!("u.{property} {symbol} :{param}"));

            let condition = build(Expr::prop("u", property), Expr::param(&param));
            expr = Some(match expr {
                None => condition,
                Some(expr) if disjunction => expr.or(condition),
                Some(expr) => expr.and(condition),
            });
        }

        let mut fluent = Query::new().from_as("User", "u");
        if let Some(expr) = expr {
            fluent = fluent.where_expr(expr);
        }
        if like_filter {
            text.push_str(" filter u.name like :q");
            fluent = fluent.filter_like("u", "name", "q");
        }
        if let Some(descending) = descending {
            text.push_str(if descending { " order by u.born descending" } else { " order by u.born" });
            fluent = fluent.order_by("u", "born", descending);
        }

        let parsed = Query::parse(&text).unwrap();
        let (fluent_select, _) = generate(&fluent);
        let (parsed_select, _) = generate(&parsed);
        prop_assert_eq!(&fluent_select.sql, &parsed_select.sql);
        prop_assert_eq!(
            fluent_select.parameters.keys().collect::<Vec<_>>(),
            parsed_select.parameters.keys().collect::<Vec<_>>()
        );
    }
}
