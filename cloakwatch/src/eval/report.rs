// cloakwatch/src/eval/report.rs
//
// Markdown/JSON report output for the eval framework.

use super::EvalResult;

/// Approximate area under the ROC curve.
/// A proper AUC needs every (score, label) pair; from aggregate counters we
/// use AUC ≈ (1 + TPR - FPR) / 2.
pub fn auc_roc_approx(result: &EvalResult) -> f64 {
    let tpr = result.global.recall();
    let fpr = result.global.fpr();
    (1.0 + tpr - fpr) / 2.0
}

/// Print a markdown-formatted full report to stdout.
pub fn print_markdown(result: &EvalResult) {
    let auc = auc_roc_approx(result);
    println!("# Cloakwatch Evaluation Report");
    println!();
    println!(
        "**Records**: {}  **Positive**: {}  **Negative**: {}  **Threshold**: {}",
        result.n_records, result.n_positive, result.n_negative, result.threshold
    );
    println!();
    println!("| Metric    | Value  |");
    println!("|-----------|--------|");
    println!("| Precision | {:.4}  |", result.global.precision());
    println!("| Recall    | {:.4}  |", result.global.recall());
    println!("| F1        | {:.4}  |", result.global.f1());
    println!("| FPR       | {:.4}  |", result.global.fpr());
    println!("| AUC-ROC   | {:.4}  |", auc);
    println!();
    result.print_report();
}

/// Serialize the evaluation result to JSON for downstream consumption.
pub fn to_json(result: &EvalResult) -> String {
    serde_json::json!({
        "n_records":   result.n_records,
        "n_positive":  result.n_positive,
        "n_negative":  result.n_negative,
        "threshold":   result.threshold,
        "precision":   result.global.precision(),
        "recall":      result.global.recall(),
        "f1":          result.global.f1(),
        "fpr":         result.global.fpr(),
        "auc_roc":     auc_roc_approx(result),
        "band_counts": result.band_counts,
    })
    .to_string()
}
