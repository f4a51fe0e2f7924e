//! Grammars and programs shared by unit tests.

use crate::ast::SourceAst;
use crate::grammar::Grammar;
use crate::grammar_parser::GrammarParser;
use crate::interpreter::Interpreter;

/// Same rules as `languages/mini.json`, in rule notation.
pub(crate) const MINI: &str = r#"
program     <- item*
item        <- function / class_decl / statement
function    <- "fn" IDENT "(" params? ")" block
params      <- IDENT ("," IDENT)*
class_decl  <- "class" IDENT "{" (function / assignment)* "}"
block       <- "{" statement* "}"
statement   <- if_stmt / while_stmt / for_stmt / return_stmt / print_stmt / assignment / expr_stmt
if_stmt     <- "if" expr block ("else" (if_stmt / block))?
while_stmt  <- "while" expr block
for_stmt    <- "for" IDENT "in" expr ".." expr block
return_stmt <- "return" expr? ";"
print_stmt  <- "print" expr ";"
assignment  <- IDENT "=" expr ";"
expr_stmt   <- expr ";"
expr        <- logic
logic       <- comparison (("&&" / "||") comparison)*
comparison  <- sum (("==" / "!=" / "<=" / ">=" / "<" / ">") sum)?
sum         <- term (("+" / "-") term)*
term        <- unary (("*" / "/" / "%") unary)*
unary       <- ("-" / "!") unary / primary
primary     <- call / NUMBER / STRING / "true" / "false" / IDENT / "(" expr ")"
call        <- IDENT "(" args? ")"
args        <- expr ("," expr)*
"#;

/// Flat assignment language used by the arithmetic examples.
pub(crate) const ARITHMETIC: &str = r#"
program   <- statement*
statement <- IDENT "=" expr ";"
expr      <- term (("+" / "-") term)*
term      <- factor (("*" / "/") factor)*
factor    <- NUMBER / IDENT / "(" expr ")"
"#;

pub(crate) fn mini_grammar() -> Grammar {
    GrammarParser::new()
        .parse(MINI)
        .expect("mini grammar")
        .with_comment_patterns(["//", "/* */"])
}

pub(crate) fn arithmetic_grammar() -> Grammar {
    GrammarParser::new().parse(ARITHMETIC).expect("arithmetic grammar")
}

pub(crate) fn parse_mini(source: &str) -> SourceAst {
    Interpreter::new(&mini_grammar())
        .parse(source)
        .expect("mini source")
}

pub(crate) fn parse_arithmetic(source: &str) -> SourceAst {
    Interpreter::new(&arithmetic_grammar())
        .parse(source)
        .expect("arithmetic source")
}
