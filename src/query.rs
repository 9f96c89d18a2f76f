//! Query construction for the evaluator.
//!
//! A [`QueryBuilder`] turns a check and its snapshot into the text of a
//! program the evaluator runs with `--script`. Builders are pure: the
//! generation stages their output into files before any check starts.

use std::path::PathBuf;

use crate::check::CheckKind;
use crate::config::Config;
use crate::snapshot::Snapshot;
use crate::util::scheme_string;

pub trait QueryBuilder: Send + Sync {
    /// Program text for `kind` against `snapshot`.
    fn build_query(&self, kind: &CheckKind, snapshot: &Snapshot) -> String;
}

impl<F> QueryBuilder for F
where
    F: Fn(&CheckKind, &Snapshot) -> String + Send + Sync,
{
    fn build_query(&self, kind: &CheckKind, snapshot: &Snapshot) -> String {
        self(kind, snapshot)
    }
}

/// Helpers shared by every generated query.
///
/// Definitions, inputs and expected outputs arrive as strings and are read
/// inside the evaluator, so a reader error becomes a sentinel instead of a
/// crashed script. `,X` holes in the definition become fresh logic variables.
const PRELUDE: &str = r#"(define (read-all-from-string s)
  (let ((port (open-input-string s)))
    (let loop ((acc '()))
      (let ((x (read port)))
        (if (eof-object? x) (reverse acc) (loop (cons x acc)))))))

(define (try-read-all s)
  (call/cc
    (lambda (k)
      (with-exception-handler
        (lambda (e) (k #f))
        (lambda () (read-all-from-string s))))))

(define (try-read-one s)
  (let ((xs (try-read-all s)))
    (and xs (= (length xs) 1) xs)))

(define (hole? x)
  (and (pair? x) (eq? (car x) 'unquote)
       (pair? (cdr x)) (symbol? (cadr x)) (null? (cddr x))))

(define (collect-holes x acc)
  (cond
    ((hole? x) (if (memq (cadr x) acc) acc (cons (cadr x) acc)))
    ((pair? x) (collect-holes (cdr x) (collect-holes (car x) acc)))
    (else acc)))

(define (plug x env)
  (cond
    ((hole? x) (cdr (assq (cadr x) env)))
    ((pair? x) (cons (plug (car x) env) (plug (cdr x) env)))
    (else x)))

(define (fresh-holes names k)
  (if (null? names)
      (k '())
      (fresh (v)
        (fresh-holes (cdr names)
          (lambda (env) (k (cons (cons (car names) v) env)))))))

(define (with-holes defns k)
  (fresh-holes (collect-holes defns '())
    (lambda (env) (k (plug defns env)))))

(define (parses? defns body)
  (not (null? (run 1 (q)
    (with-holes defns (lambda (ds) (parseo `(begin ,@ds ,body))))))))
"#;

const DRIVER: &str = r#"(let ((ans (query-val)))
  (if (symbol? ans) (display ans) (write ans))
  (newline))
"#;

/// Builds miniKanren queries against the relational interpreter.
///
/// Every query loads `mk-vicare.scm` and `mk.scm` from `mk_dir`, then the
/// interpreter semantics, then defines `query-val` for its check.
#[derive(Debug, Clone)]
pub struct SchemeQueryBuilder {
    mk_dir: PathBuf,
}

impl SchemeQueryBuilder {
    pub fn new(mk_dir: impl Into<PathBuf>) -> Self {
        Self {
            mk_dir: mk_dir.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.mk_dir.clone())
    }

    fn header(&self, title: &str, snapshot: &Snapshot) -> String {
        let mk_vicare = self.mk_dir.join("mk-vicare.scm");
        let mk = self.mk_dir.join("mk.scm");
        format!(
            ";; {title}\n\n(load {})\n(load {})\n\n{}\n\n{PRELUDE}\n(define defns (try-read-all {}))\n\n",
            scheme_string(&mk_vicare.to_string_lossy()),
            scheme_string(&mk.to_string_lossy()),
            snapshot.semantics,
            scheme_string(&snapshot.definition),
        )
    }

    fn definition_query(&self, snapshot: &Snapshot) -> String {
        let mut query = self.header("definition query", snapshot);
        query.push_str(
            r#"(define (query-val)
  (cond
    ((not defns) 'illegal-sexp-in-defn)
    ((not (parses? defns '(quote defined))) 'parse-error-in-defn)
    (else
      (run 1 (q)
        (with-holes defns
          (lambda (ds) (evalo `(begin ,@ds (quote defined)) q)))))))

"#,
        );
        query.push_str(DRIVER);
        query
    }

    fn example_query(&self, snapshot: &Snapshot, input: &str, expected_output: &str) -> String {
        let mut query = self.header("individual test query", snapshot);
        query.push_str(&format!(
            "(define input (try-read-one {}))\n(define output (try-read-one {}))\n\n",
            scheme_string(input),
            scheme_string(expected_output),
        ));
        query.push_str(
            r#"(define (query-val)
  (cond
    ((not defns) 'illegal-sexp-in-defn)
    ((not (and input output)) 'illegal-sexp-in-test/answer)
    ((not (parses? defns '(quote defined))) 'parse-error-in-defn)
    ((not (parses? defns (car input))) 'parse-error-in-test/answer)
    (else
      (run 1 (q)
        (with-holes defns
          (lambda (ds) (evalo `(begin ,@ds ,(car input)) (car output))))))))

"#,
        );
        query.push_str(DRIVER);
        query
    }

    fn search_query(&self, snapshot: &Snapshot) -> String {
        let mut query = self.header("allTests", snapshot);
        let (inputs, outputs): (Vec<String>, Vec<String>) = snapshot
            .active_examples()
            .map(|example| {
                (
                    scheme_string(&example.input),
                    scheme_string(&example.expected_output),
                )
            })
            .unzip();
        query.push_str(&format!(
            "(define inputs (map try-read-one (list {})))\n(define outputs (map try-read-one (list {})))\n\n",
            inputs.join(" "),
            outputs.join(" "),
        ));
        query.push_str(
            r#"(define (all-read? xs)
  (or (null? xs) (and (car xs) (all-read? (cdr xs)))))

(define (query-val)
  (cond
    ((not defns) 'illegal-sexp-in-defn)
    ((not (and (all-read? inputs) (all-read? outputs))) 'illegal-sexp-in-test/answer)
    ((not (parses? defns '(quote defined))) 'parse-error-in-defn)
    ((not (parses? defns `((lambda x x) ,@(map car inputs)))) 'parse-error-in-test/answer)
    (else
      (let ((ans (run 1 (q)
                   (with-holes defns
                     (lambda (ds)
                       (fresh ()
                         (== q ds)
                         (evalo `(begin ,@ds ((lambda x x) ,@(map car inputs)))
                                (map car outputs))))))))
        (if (null? ans) 'fail ans)))))

"#,
        );
        query.push_str(DRIVER);
        query
    }
}

impl QueryBuilder for SchemeQueryBuilder {
    fn build_query(&self, kind: &CheckKind, snapshot: &Snapshot) -> String {
        match kind {
            CheckKind::DefinitionCheck => self.definition_query(snapshot),
            CheckKind::CombinedSearch => self.search_query(snapshot),
            CheckKind::ExampleCheck(id) => {
                let (input, expected) = snapshot
                    .examples
                    .iter()
                    .find(|example| example.id == *id)
                    .map(|example| (example.input.as_str(), example.expected_output.as_str()))
                    .unwrap_or(("", ""));
                self.example_query(snapshot, input, expected)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Example;

    fn snapshot() -> Snapshot {
        Snapshot::new("(define sq (lambda (n) ,A))", ";; semantics")
            .with_example(Example::new("(sq 5)", "25"))
            .with_example(Example::new("(sq \"x\")", ""))
    }

    #[test]
    fn closures_are_query_builders() {
        let builder = |kind: &CheckKind, _: &Snapshot| kind.to_string();
        assert_eq!(
            builder.build_query(&CheckKind::CombinedSearch, &Snapshot::default()),
            "combined search"
        );
    }

    #[test]
    fn every_query_loads_minikanren_then_semantics() {
        let builder = SchemeQueryBuilder::new("/opt/mk");
        let query = builder.build_query(&CheckKind::DefinitionCheck, &snapshot());
        let vicare = query.find("(load \"/opt/mk/mk-vicare.scm\")").unwrap();
        let mk = query.find("(load \"/opt/mk/mk.scm\")").unwrap();
        let semantics = query.find(";; semantics").unwrap();
        assert!(vicare < mk && mk < semantics);
        assert!(query.contains("(define defns (try-read-all \"(define sq (lambda (n) ,A))\"))"));
        assert!(query.trim_end().ends_with("(newline))"));
    }

    #[test]
    fn example_query_embeds_its_own_example() {
        let snapshot = snapshot();
        let id = snapshot.examples[0].id;
        let query = SchemeQueryBuilder::new("/opt/mk").build_query(&CheckKind::ExampleCheck(id), &snapshot);
        assert!(query.starts_with(";; individual test query"));
        assert!(query.contains("(define input (try-read-one \"(sq 5)\"))"));
        assert!(query.contains("(define output (try-read-one \"25\"))"));
        assert!(query.contains("'parse-error-in-test/answer"));
    }

    #[test]
    fn search_query_covers_only_active_examples() {
        let query = SchemeQueryBuilder::new("/opt/mk").build_query(&CheckKind::CombinedSearch, &snapshot());
        assert!(query.contains("(define inputs (map try-read-one (list \"(sq 5)\")))"));
        assert!(!query.contains("\\\"x\\\""));
        assert!(query.contains("'fail"));
    }
}
