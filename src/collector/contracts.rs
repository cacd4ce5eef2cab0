//! Design-by-contract usage in Python sources.
//!
//! Sources are parsed into a syntax tree; every function definition (nested
//! ones and methods included) is counted, and every decorator whose name is
//! a known contract name counts as one contract.

use std::path::Path;

use rustpython_parser::{ast, Parse};
use tracing::debug;

use super::code::source_files;

/// Decorator names recognized as contracts, compared case-insensitively.
pub const CONTRACT_NAMES: [&str; 5] = ["pre", "post", "require", "ensure", "invariant"];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContractStats {
    pub contracts: u64,
    pub functions: u64,
}

impl ContractStats {
    pub fn has_contracts(&self) -> bool {
        self.contracts > 0
    }

    /// contracts / (functions * 2): one pre- and one postcondition per function.
    ///
    /// Capped at `1.0`; a function may stack several contracts of one kind.
    pub fn coverage(&self) -> f64 {
        (self.contracts as f64 / (self.functions * 2).max(1) as f64).min(1.0)
    }

    fn add(&mut self, other: ContractStats) {
        self.contracts += other.contracts;
        self.functions += other.functions;
    }
}

/// Counts functions and contracts in one source text.
///
/// Source that does not parse contributes nothing.
pub fn scan_source(source: &str, name: &str) -> ContractStats {
    match ast::Suite::parse(source, name) {
        Ok(suite) => {
            let mut stats = ContractStats::default();
            visit_body(&suite, &mut stats);
            stats
        }
        Err(e) => {
            debug!(file = name, error = %e, "Skipping unparsable source");
            ContractStats::default()
        }
    }
}

/// Totals over every non-test source file below `root`.
pub fn scan_tree(root: &Path) -> ContractStats {
    let mut total = ContractStats::default();
    for path in source_files(root) {
        if let Ok(source) = std::fs::read_to_string(&path) {
            total.add(scan_source(&source, &path.to_string_lossy()));
        }
    }
    total
}

fn visit_body(body: &[ast::Stmt], stats: &mut ContractStats) {
    for stmt in body {
        visit_stmt(stmt, stats);
    }
}

fn visit_stmt(stmt: &ast::Stmt, stats: &mut ContractStats) {
    match stmt {
        ast::Stmt::FunctionDef(ast::StmtFunctionDef {
            decorator_list, body, ..
        })
        | ast::Stmt::AsyncFunctionDef(ast::StmtAsyncFunctionDef {
            decorator_list, body, ..
        }) => {
            stats.functions += 1;
            stats.contracts += decorator_list.iter().filter(|d| is_contract(d)).count() as u64;
            visit_body(body, stats);
        }
        ast::Stmt::ClassDef(ast::StmtClassDef { body, .. }) => visit_body(body, stats),
        ast::Stmt::If(ast::StmtIf { body, orelse, .. })
        | ast::Stmt::For(ast::StmtFor { body, orelse, .. })
        | ast::Stmt::AsyncFor(ast::StmtAsyncFor { body, orelse, .. })
        | ast::Stmt::While(ast::StmtWhile { body, orelse, .. }) => {
            visit_body(body, stats);
            visit_body(orelse, stats);
        }
        ast::Stmt::With(ast::StmtWith { body, .. })
        | ast::Stmt::AsyncWith(ast::StmtAsyncWith { body, .. }) => visit_body(body, stats),
        ast::Stmt::Try(ast::StmtTry {
            body,
            handlers,
            orelse,
            finalbody,
            ..
        })
        | ast::Stmt::TryStar(ast::StmtTryStar {
            body,
            handlers,
            orelse,
            finalbody,
            ..
        }) => {
            visit_body(body, stats);
            for handler in handlers {
                let ast::ExceptHandler::ExceptHandler(h) = handler;
                visit_body(&h.body, stats);
            }
            visit_body(orelse, stats);
            visit_body(finalbody, stats);
        }
        ast::Stmt::Match(ast::StmtMatch { cases, .. }) => {
            for case in cases {
                visit_body(&case.body, stats);
            }
        }
        _ => {}
    }
}

/// `@pre`, `@pre(...)`, `@deal.pre` and `@deal.pre(...)` all count.
fn is_contract(decorator: &ast::Expr) -> bool {
    let target = match decorator {
        ast::Expr::Call(call) => call.func.as_ref(),
        other => other,
    };
    let name = match target {
        ast::Expr::Name(n) => n.id.as_str(),
        ast::Expr::Attribute(a) => a.attr.as_str(),
        _ => return false,
    };
    CONTRACT_NAMES.iter().any(|known| known.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONTRACTED: &str = r#"
import deal
from deal import pre, post

@pre(lambda x: x > 0)
@post(lambda result: result >= 0)
def square(x):
    return x * x

@deal.Pre(lambda s: s)
@deal.ensure
def shout(s):
    return s.upper()

class Account:
    @invariant
    def balance(self):
        if True:
            def helper():
                return 0
        return 0

@staticmethod
def plain():
    pass
"#;

    #[test]
    fn test_counts_functions_and_contracts() {
        let stats = scan_source(CONTRACTED, "contracted.py");
        // square, shout, balance, helper, plain
        assert_eq!(stats.functions, 5);
        // pre, post, Pre, ensure, invariant
        assert_eq!(stats.contracts, 5);
        assert!(stats.has_contracts());
        assert!((stats.coverage() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_syntax_error_degrades_to_zero() {
        let stats = scan_source("def broken(:\n    pass\n", "broken.py");
        assert_eq!(stats, ContractStats::default());
        assert!(!stats.has_contracts());
        assert_eq!(stats.coverage(), 0.0);
    }

    #[test]
    fn test_scan_tree_skips_tests() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("src/core")).unwrap();
        std::fs::create_dir_all(tmp.path().join("tests")).unwrap();
        std::fs::write(tmp.path().join("src/core/ops.py"), CONTRACTED).unwrap();
        std::fs::write(tmp.path().join("src/core/bad.py"), "def (").unwrap();
        std::fs::write(tmp.path().join("tests/test_ops.py"), "def test_a():\n    pass\n").unwrap();

        let stats = scan_tree(tmp.path());
        assert_eq!(stats.functions, 5);
        assert_eq!(stats.contracts, 5);
    }

    #[test]
    fn test_coverage_is_capped_at_one() {
        let source = "@pre(lambda x: x > 0)\n@pre(lambda x: x < 10)\n@post(lambda r: r > 0)\ndef f(x):\n    return x\n";
        let stats = scan_source(source, "stacked.py");
        assert_eq!(stats.functions, 1);
        assert_eq!(stats.contracts, 3);
        assert_eq!(stats.coverage(), 1.0);
    }

    #[test]
    fn test_no_functions_means_zero_coverage() {
        let stats = scan_source("X = 1\n", "consts.py");
        assert_eq!(stats.coverage(), 0.0);
    }
}
