//! Lexer tests

use super::*;
use maplit::hashmap;
use std::collections::HashMap;

fn lex(src: &str) -> Vec<Token> {
    tokenize(src, &HashMap::new()).expect("tokenize failed")
}

#[test]
fn empty_source_is_just_the_sentinel() {
    let toks = lex("");
    assert_eq!(toks.len(), 1);
    assert!(toks[0].is_eof());
}

#[test]
fn keywords_numbers_and_idents() {
    let toks = lex("int total = 42;");
    assert_eq!(toks[0].kind, TokenKind::Keyword(Kw::Int));
    assert_eq!(toks[1].kind, TokenKind::Ident);
    assert_eq!(toks[1].text, "total");
    assert_eq!(toks[2].kind, TokenKind::Keyword(Kw::Assign));
    assert_eq!(toks[3].kind, TokenKind::IntLit(42));
    assert_eq!(toks[4].kind, TokenKind::Keyword(Kw::Semicolon));
    assert!(toks[5].is_eof());
}

#[test]
fn numeric_literal_forms() {
    let toks = lex("0x1F 3.5 2e3 1.5e-2 7");
    assert_eq!(toks[0].kind, TokenKind::IntLit(0x1F));
    assert_eq!(toks[1].kind, TokenKind::FloatLit(3.5));
    assert_eq!(toks[2].kind, TokenKind::FloatLit(2000.0));
    assert_eq!(toks[3].kind, TokenKind::FloatLit(0.015));
    assert_eq!(toks[4].kind, TokenKind::IntLit(7));
}

#[test]
fn string_escapes() {
    let toks = lex(r#""a\tb\n""#);
    assert_eq!(toks[0].kind, TokenKind::StrLit("a\tb\n".to_string()));
}

#[test]
fn unterminated_string_is_an_error() {
    let err = tokenize("\"oops", &HashMap::new()).unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::BadString);
    assert_eq!(err.span.start, 0);
}

#[test]
fn multibyte_letters_form_identifiers() {
    let toks = lex("int étape = 1; crème++;");
    assert_eq!(toks[1].kind, TokenKind::Ident);
    assert_eq!(toks[1].text, "étape");
    assert_eq!(toks[5].kind, TokenKind::Ident);
    assert_eq!(toks[5].text, "crème");
}

#[test]
fn non_letter_multibyte_character_is_an_error() {
    let err = tokenize("int a = 1 € 2;", &HashMap::new()).unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::BadChar);
}

#[test]
fn operators_take_longest_match() {
    let toks = lex("a >>> b >> c > d == e = f");
    assert_eq!(toks[1].kind, TokenKind::Keyword(Kw::Shr));
    assert_eq!(toks[3].kind, TokenKind::Keyword(Kw::Asr));
    assert_eq!(toks[5].kind, TokenKind::Keyword(Kw::Hi));
    assert_eq!(toks[7].kind, TokenKind::Keyword(Kw::Eq));
    assert_eq!(toks[9].kind, TokenKind::Keyword(Kw::Assign));
}

#[test]
fn comments_attach_as_separator_text() {
    let toks = lex("a // note\nb /* block */ c");
    assert_eq!(toks[0].text, "a");
    assert_eq!(toks[0].sep, " // note\n");
    assert_eq!(toks[1].text, "b");
    assert_eq!(toks[1].sep, " /* block */ ");
    assert_eq!(toks[2].text, "c");
}

#[test]
fn source_reconstructs_from_text_and_separators() {
    let src = "int  x = 1; // done\nx++;";
    let toks = lex(src);
    let mut rebuilt = String::new();
    for t in &toks {
        rebuilt.push_str(&t.text);
        rebuilt.push_str(&t.sep);
    }
    // Leading separators are empty here, so the stream reproduces the source.
    assert_eq!(rebuilt, src);
}

#[test]
fn named_constants_shadow_identifiers() {
    let constants = hashmap! { "EnergyCell".to_string() => 12 };
    let toks = tokenize("EnergyCell other", &constants).unwrap();
    assert_eq!(toks[0].kind, TokenKind::DefNum(12));
    assert_eq!(toks[1].kind, TokenKind::Ident);
}

#[test]
fn illegal_character_fails_with_position() {
    let err = tokenize("int a = #;", &HashMap::new()).unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::BadChar);
    assert_eq!(err.span.start, 8);
}

#[test]
fn spans_are_byte_offsets() {
    let toks = lex("ab + cd");
    assert_eq!((toks[0].span.start, toks[0].span.end), (0, 2));
    assert_eq!((toks[1].span.start, toks[1].span.end), (3, 4));
    assert_eq!((toks[2].span.start, toks[2].span.end), (5, 7));
}
