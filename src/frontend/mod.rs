pub mod lexer;
pub mod parser;
pub mod parser_error;
pub mod position;
pub mod preprocess;
pub mod token;
pub mod token_dumper;
