use std::collections::HashMap;

use super::{FeedStatus, ParserPlan};
use crate::error::{ParseError, ParseErrorKind};
use crate::options::PlanOptions;
use crate::plan::build_parser_plan;
use crate::shape::{FieldSpec, ScalarKind, Shape};
use crate::value::Value;

fn plan_with(shape: &Shape, options: PlanOptions) -> ParserPlan {
    build_parser_plan(shape, options).unwrap().plan
}

fn plan_for(shape: &Shape) -> ParserPlan {
    plan_with(shape, PlanOptions::default())
}

fn parse<T: 'static>(plan: &ParserPlan, input: &str) -> T {
    *plan.parse_str(input).unwrap().downcast::<T>().unwrap()
}

fn parse_chunks<T: 'static>(plan: &ParserPlan, chunks: &[&str]) -> T {
    let mut session = plan.start();
    for chunk in chunks {
        session.feed(chunk.as_bytes()).unwrap();
    }
    *session.end().unwrap().downcast::<T>().unwrap()
}

fn parse_err(plan: &ParserPlan, input: &str) -> ParseError {
    match plan.parse_str(input) {
        Ok(_) => panic!("expected parse failure for {input:?}"),
        Err(err) => err,
    }
}

#[derive(Debug, Default, PartialEq)]
struct Person {
    name: String,
    age: i32,
}

fn person_shape() -> Shape {
    Shape::object::<Person>(vec![
        FieldSpec::required(
            "name",
            Shape::string(),
            |p: &mut Person, v| p.name = v,
            |p: &Person| &p.name,
        ),
        FieldSpec::required(
            "age",
            Shape::scalar(ScalarKind::I32),
            |p: &mut Person, v| p.age = v,
            |p: &Person| &p.age,
        ),
    ])
}

#[test]
fn object_in_declared_order() {
    let plan = plan_for(&person_shape());
    let person: Person = parse(&plan, r#"{"name":"Ada","age":37}"#);
    assert_eq!(person, Person { name: "Ada".into(), age: 37 });
}

#[test]
fn object_in_any_key_order() {
    let plan = plan_for(&person_shape());
    let person: Person = parse(&plan, r#"{"age":37,"name":"Ada"}"#);
    assert_eq!(person, Person { name: "Ada".into(), age: 37 });
}

#[test]
fn object_tolerates_whitespace() {
    let plan = plan_for(&person_shape());
    let person: Person = parse(&plan, " { \"name\" : \"Ada\" ,\n\t\"age\" : 37 } \r\n");
    assert_eq!(person, Person { name: "Ada".into(), age: 37 });
}

#[test]
fn empty_composites() {
    #[derive(Debug, Default, PartialEq)]
    struct Empty {}
    let plan = plan_for(&Shape::object::<Empty>(vec![]));
    let _: Empty = parse(&plan, "{}");

    let plan = plan_for(&Shape::list_of::<f64>(Shape::scalar(ScalarKind::F64)));
    let list: Vec<f64> = parse(&plan, "[]");
    assert!(list.is_empty());

    let plan = plan_for(&Shape::map_of::<bool>(Shape::scalar(ScalarKind::Bool)));
    let map: HashMap<String, bool> = parse(&plan, "{}");
    assert!(map.is_empty());
}

#[test]
fn float_list() {
    let plan = plan_for(&Shape::list_of::<f64>(Shape::scalar(ScalarKind::F64)));
    let list: Vec<f64> = parse(&plan, "[1, 2.5, -3e2]");
    assert_eq!(list, vec![1.0, 2.5, -300.0]);
}

#[test]
fn bool_map_duplicates_last_write_wins() {
    let plan = plan_for(&Shape::map_of::<bool>(Shape::scalar(ScalarKind::Bool)));
    let map: HashMap<String, bool> = parse(&plan, r#"{"a":true,"b":false,"a":true}"#);
    assert_eq!(map.len(), 2);
    assert_eq!(map["a"], true);
    assert_eq!(map["b"], false);
}

#[test]
fn bool_map_duplicates_strict() {
    let input = r#"{"a":true,"b":false,"a":true}"#;
    let plan = plan_with(
        &Shape::map_of::<bool>(Shape::scalar(ScalarKind::Bool)),
        PlanOptions {
            strict_duplicates: true,
            ..Default::default()
        },
    );
    let err = parse_err(&plan, input);
    assert_eq!(err.kind, ParseErrorKind::DuplicateField);
    assert_eq!(err.offset, input.rfind("\"a\"").unwrap());
}

#[test]
fn duplicate_object_fields() {
    let input = r#"{"age":1,"age":2}"#;
    #[derive(Debug, Default, PartialEq)]
    struct OnlyAge {
        age: i32,
    }
    let shape = Shape::object::<OnlyAge>(vec![FieldSpec::required(
        "age",
        Shape::scalar(ScalarKind::I32),
        |p: &mut OnlyAge, v| p.age = v,
        |p: &OnlyAge| &p.age,
    )]);

    let relaxed: OnlyAge = parse(&plan_for(&shape), input);
    assert_eq!(relaxed.age, 2);

    let strict = plan_with(
        &shape,
        PlanOptions {
            strict_duplicates: true,
            ..Default::default()
        },
    );
    let err = parse_err(&strict, input);
    assert_eq!(err.kind, ParseErrorKind::DuplicateField);
    assert_eq!(err.offset, input.rfind("\"age\"").unwrap());
}

#[test]
fn out_of_range_points_at_token_start() {
    let input = r#"{"id":9999999999}"#;
    #[derive(Debug, Default, PartialEq)]
    struct Id {
        id: i32,
    }
    let plan = plan_for(&Shape::object::<Id>(vec![FieldSpec::required(
        "id",
        Shape::scalar(ScalarKind::I32),
        |p: &mut Id, v| p.id = v,
        |p: &Id| &p.id,
    )]));
    let err = parse_err(&plan, input);
    assert_eq!(err.kind, ParseErrorKind::NumberOutOfRange);
    assert_eq!(err.offset, input.find('9').unwrap());
}

#[test]
fn integer_bounds_per_kind() {
    let plan = plan_for(&Shape::scalar(ScalarKind::I8));
    assert_eq!(parse::<i8>(&plan, "-128"), i8::MIN);
    assert_eq!(parse::<i8>(&plan, "127"), i8::MAX);
    assert_eq!(parse_err(&plan, "128").kind, ParseErrorKind::NumberOutOfRange);
    assert_eq!(parse_err(&plan, "-129").kind, ParseErrorKind::NumberOutOfRange);

    let plan = plan_for(&Shape::scalar(ScalarKind::U64));
    assert_eq!(parse::<u64>(&plan, "18446744073709551615"), u64::MAX);
    assert_eq!(
        parse_err(&plan, "18446744073709551616").kind,
        ParseErrorKind::NumberOutOfRange
    );
    assert_eq!(parse_err(&plan, "-1").kind, ParseErrorKind::NumberOutOfRange);
}

#[test]
fn integer_rejects_fraction_and_exponent() {
    let plan = plan_for(&Shape::scalar(ScalarKind::I32));
    assert_eq!(parse_err(&plan, "1.5").kind, ParseErrorKind::TypeMismatch);
    assert_eq!(parse_err(&plan, "1e3").kind, ParseErrorKind::TypeMismatch);
}

#[test]
fn string_where_integer_expected() {
    let plan = plan_for(&Shape::scalar(ScalarKind::I32));
    let err = parse_err(&plan, "\"5\"");
    assert_eq!(err.kind, ParseErrorKind::TypeMismatch);
    assert_eq!(err.offset, 0);
}

#[test]
fn garbage_is_unexpected_token() {
    let plan = plan_for(&Shape::scalar(ScalarKind::I32));
    assert_eq!(parse_err(&plan, "#").kind, ParseErrorKind::UnexpectedToken);
}

#[test]
fn leading_zero_rejected() {
    let plan = plan_for(&Shape::scalar(ScalarKind::I32));
    assert_eq!(parse_err(&plan, "01").kind, ParseErrorKind::UnexpectedToken);
}

#[test]
fn every_short_escape_decodes() {
    let plan = plan_for(&Shape::string());
    let text: String = parse(&plan, r#""q\" b\\ s\/ \b \f \n \r \t""#);
    assert_eq!(text, "q\" b\\ s/ \u{8} \u{c} \n \r \t");
}

#[test]
fn unicode_escape_decodes() {
    let plan = plan_for(&Shape::string());
    let text: String = parse(&plan, r#""\u0041\u00e9\u4E16""#);
    assert_eq!(text, "A\u{e9}\u{4e16}");
}

#[test]
fn surrogate_pair_decodes() {
    let plan = plan_for(&Shape::string());
    let text: String = parse(&plan, r#""\uD83D\uDE00""#);
    assert_eq!(text, "\u{1F600}");
}

#[test]
fn lone_high_surrogate_fails() {
    let plan = plan_for(&Shape::string());
    assert_eq!(
        parse_err(&plan, r#""\uD83Dx""#).kind,
        ParseErrorKind::MalformedEscape
    );
    assert_eq!(
        parse_err(&plan, r#""\uD83D""#).kind,
        ParseErrorKind::MalformedEscape
    );
}

#[test]
fn lone_low_surrogate_fails() {
    let plan = plan_for(&Shape::string());
    assert_eq!(
        parse_err(&plan, r#""\uDE00""#).kind,
        ParseErrorKind::MalformedEscape
    );
}

#[test]
fn raw_control_byte_in_string_fails() {
    let plan = plan_for(&Shape::string());
    assert_eq!(
        parse_err(&plan, "\"a\u{1}b\"").kind,
        ParseErrorKind::UnexpectedToken
    );
}

#[test]
fn char_scalar() {
    let plan = plan_for(&Shape::scalar(ScalarKind::Char));
    assert_eq!(parse::<char>(&plan, "\"é\""), 'é');
    assert_eq!(parse_err(&plan, "\"ab\"").kind, ParseErrorKind::TypeMismatch);
    assert_eq!(parse_err(&plan, "\"\"").kind, ParseErrorKind::TypeMismatch);
}

#[test]
fn streaming_two_chunks() {
    let plan = plan_for(&Shape::list_of::<String>(Shape::string()));
    let list: Vec<String> = parse_chunks(&plan, &["[\"foo\"", ",\"bar\"]"]);
    assert_eq!(list, vec!["foo".to_string(), "bar".to_string()]);
}

#[test]
fn feeding_byte_at_a_time_matches_one_shot() {
    let input = r#"{ "name" : "AAda😀" , "age" : -37 }"#;
    let plan = plan_for(&person_shape());
    let whole: Person = parse(&plan, input);

    let mut session = plan.start();
    for b in input.as_bytes() {
        session.feed(std::slice::from_ref(b)).unwrap();
    }
    let chunked = *session.end().unwrap().downcast::<Person>().unwrap();
    assert_eq!(whole, chunked);
}

#[test]
fn suspension_reports_need_more() {
    let plan = plan_for(&Shape::list_of::<String>(Shape::string()));
    let mut session = plan.start();
    assert_eq!(session.feed(b"[\"fo").unwrap(), FeedStatus::NeedMore);
    assert!(session.is_suspended());
    assert_eq!(session.feed(b"o\"]").unwrap(), FeedStatus::Complete);
    let list = *session.end().unwrap().downcast::<Vec<String>>().unwrap();
    assert_eq!(list, vec!["foo".to_string()]);
}

#[test]
fn truncated_input_is_end_of_input() {
    let plan = plan_for(&person_shape());
    for prefix in ["", "{", "{\"name\"", "{\"name\":\"Ada\",", "{\"name\":\"Ada\",\"age\":"] {
        let err = parse_err(&plan, prefix);
        assert_eq!(err.kind, ParseErrorKind::UnexpectedEndOfInput, "{prefix:?}");
    }
}

#[test]
fn number_at_root_completes_on_end() {
    let plan = plan_for(&Shape::scalar(ScalarKind::I64));
    let mut session = plan.start();
    assert_eq!(session.feed(b"-12").unwrap(), FeedStatus::NeedMore);
    assert_eq!(session.feed(b"34").unwrap(), FeedStatus::NeedMore);
    let n = *session.end().unwrap().downcast::<i64>().unwrap();
    assert_eq!(n, -1234);
}

#[test]
fn strict_trailing_rejects_extra_tokens() {
    let plan = plan_for(&Shape::scalar(ScalarKind::I32));
    assert_eq!(parse::<i32>(&plan, "1 \n\t "), 1);
    let err = parse_err(&plan, "1 2");
    assert_eq!(err.kind, ParseErrorKind::UnexpectedToken);
    assert_eq!(err.offset, 2);
}

#[test]
fn relaxed_trailing_ignores_extra_bytes() {
    let plan = plan_with(
        &Shape::scalar(ScalarKind::I32),
        PlanOptions {
            strict_trailing: false,
            ..Default::default()
        },
    );
    assert_eq!(parse::<i32>(&plan, "1 trailing junk"), 1);
}

#[test]
fn bom_is_rejected() {
    let plan = plan_for(&Shape::scalar(ScalarKind::I32));
    let err = plan.parse_bytes(b"\xEF\xBB\xBF1").unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::UnexpectedToken);
    assert_eq!(err.offset, 0);
}

#[test]
fn depth_guard_fails_with_unexpected_token() {
    let plan = plan_for(&Shape::any());
    let deep = "[".repeat(600);
    let err = plan.parse_str(&deep).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::UnexpectedToken);
}

#[test]
fn unknown_fields_discarded_by_default() {
    let plan = plan_for(&person_shape());
    let person: Person = parse(
        &plan,
        r#"{"name":"Ada","extra":{"deep":[1,true,null,{"x":"y"}]},"age":37}"#,
    );
    assert_eq!(person, Person { name: "Ada".into(), age: 37 });
}

#[test]
fn unknown_fields_fail_when_configured() {
    let input = r#"{"name":"Ada","extra":1,"age":37}"#;
    let plan = plan_with(
        &person_shape(),
        PlanOptions {
            fail_on_unknown: true,
            ..Default::default()
        },
    );
    let err = parse_err(&plan, input);
    assert_eq!(err.kind, ParseErrorKind::UnknownField);
    assert_eq!(err.offset, input.find("\"extra\"").unwrap());
}

#[test]
fn optional_field_accepts_null_and_absence() {
    #[derive(Debug, Default, PartialEq)]
    struct Profile {
        name: String,
        nick: Option<String>,
    }
    let shape = Shape::object::<Profile>(vec![
        FieldSpec::required(
            "name",
            Shape::string(),
            |p: &mut Profile, v| p.name = v,
            |p: &Profile| &p.name,
        ),
        FieldSpec::optional(
            "nick",
            Shape::string(),
            |p: &mut Profile, v| p.nick = Some(v),
            |p: &Profile| p.nick.as_ref(),
        ),
    ]);
    let plan = plan_for(&shape);

    let with: Profile = parse(&plan, r#"{"name":"Ada","nick":"Lady A"}"#);
    assert_eq!(with.nick.as_deref(), Some("Lady A"));

    let null: Profile = parse(&plan, r#"{"name":"Ada","nick":null}"#);
    assert_eq!(null.nick, None);

    let absent: Profile = parse(&plan, r#"{"name":"Ada"}"#);
    assert_eq!(absent.nick, None);
}

#[test]
fn integer_keyed_map() {
    let plan = plan_for(&Shape::map_keyed::<i32, bool>(
        ScalarKind::I32,
        Shape::scalar(ScalarKind::Bool),
    ));
    let map: HashMap<i32, bool> = parse(&plan, r#"{"1":true,"-2":false}"#);
    assert_eq!(map[&1], true);
    assert_eq!(map[&-2], false);
}

#[test]
fn map_key_out_of_range() {
    let plan = plan_for(&Shape::map_keyed::<i8, bool>(
        ScalarKind::I8,
        Shape::scalar(ScalarKind::Bool),
    ));
    let err = parse_err(&plan, r#"{"300":true}"#);
    assert_eq!(err.kind, ParseErrorKind::NumberOutOfRange);
    assert_eq!(err.offset, 1);
}

#[test]
fn any_materializes_value_tree() {
    let plan = plan_for(&Shape::any());
    let value: Value = parse(&plan, r#"{"a":[1,true,null,"x"],"b":{"c":-2.5}}"#);

    let mut inner = crate::value::Map::new();
    inner.insert("c".into(), Value::Number(-2.5));
    let mut map = crate::value::Map::new();
    map.insert(
        "a".into(),
        Value::Array(vec![
            Value::Number(1.0),
            Value::Boolean(true),
            Value::Null,
            Value::String("x".into()),
        ]),
    );
    map.insert("b".into(), Value::Object(inner));
    assert_eq!(value, Value::Object(map));
}

#[test]
fn nested_lists() {
    let plan = plan_for(&Shape::list_of::<Vec<u8>>(Shape::list_of::<u8>(
        Shape::scalar(ScalarKind::U8),
    )));
    let grid: Vec<Vec<u8>> = parse(&plan, "[[1,2],[],[3]]");
    assert_eq!(grid, vec![vec![1, 2], vec![], vec![3]]);
}

#[test]
fn recursive_shape_parses() {
    #[derive(Debug, Default, PartialEq)]
    struct Node {
        label: String,
        children: Vec<Node>,
    }
    let shape = Shape::object_recursive::<Node, _>(|node| {
        vec![
            FieldSpec::required(
                "label",
                Shape::string(),
                |n: &mut Node, v| n.label = v,
                |n: &Node| &n.label,
            ),
            FieldSpec::required(
                "children",
                Shape::list_of::<Node>(node.clone()),
                |n: &mut Node, v| n.children = v,
                |n: &Node| &n.children,
            ),
        ]
    });
    let plan = plan_for(&shape);
    let tree: Node = parse(
        &plan,
        r#"{"label":"root","children":[{"label":"leaf","children":[]}]}"#,
    );
    assert_eq!(tree.label, "root");
    assert_eq!(tree.children.len(), 1);
    assert_eq!(tree.children[0].label, "leaf");
}

#[test]
fn session_poisons_after_error() {
    let plan = plan_for(&Shape::scalar(ScalarKind::I32));
    let mut session = plan.start();
    let err = session.feed(b"x").unwrap_err();
    assert_eq!(session.feed(b"1").unwrap_err(), err);
    assert_eq!(session.end().unwrap_err(), err);
}

#[test]
fn trailing_comma_rejected() {
    let plan = plan_for(&Shape::list_of::<f64>(Shape::scalar(ScalarKind::F64)));
    assert_eq!(parse_err(&plan, "[1,]").kind, ParseErrorKind::UnexpectedToken);

    let plan = plan_for(&person_shape());
    assert_eq!(
        parse_err(&plan, r#"{"name":"Ada","age":37,}"#).kind,
        ParseErrorKind::UnexpectedToken
    );
}

#[test]
fn keys_with_escapes_still_match_fields() {
    #[derive(Debug, Default, PartialEq)]
    struct Odd {
        na_me: i32,
    }
    let shape = Shape::object::<Odd>(vec![FieldSpec::required(
        "na\nme",
        Shape::scalar(ScalarKind::I32),
        |p: &mut Odd, v| p.na_me = v,
        |p: &Odd| &p.na_me,
    )]);
    let plan = plan_for(&shape);
    let odd: Odd = parse(&plan, r#"{"na\nme":7}"#);
    assert_eq!(odd.na_me, 7);
}

#[test]
fn parse_stream_uses_chunked_reads() {
    let plan = plan_for(&Shape::list_of::<i64>(Shape::scalar(ScalarKind::I64)));
    let input = format!("[{}]", (0..500).map(|n| n.to_string()).collect::<Vec<_>>().join(","));
    let parsed = plan.parse_stream(input.as_bytes()).unwrap();
    let list = *parsed.downcast::<Vec<i64>>().unwrap();
    assert_eq!(list.len(), 500);
    assert_eq!(list[499], 499);
}
