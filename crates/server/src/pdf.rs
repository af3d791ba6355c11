//! Quotation document rendering.
//!
//! A fully resolved quotation aggregate is rendered through a Tera HTML
//! template and converted to an A4 PDF by an external `wkhtmltopdf`
//! process, with the company identity block repeated on every page. Each
//! generation writes a new artifact named from the reference number plus a
//! timestamp; artifacts are never overwritten in place.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tera::{Context, Tera};
use tokio::process::Command;
use tracing::{info, warn};

use quotar_core::config::{CompanyConfig, DocumentsConfig};
use quotar_core::domain::client::Client;
use quotar_core::domain::quotation::Quotation;
use quotar_core::pricing;

/// Register custom Tera filters used by the quotation template.
///
/// - `money`: two-decimal amount formatting, accepting both numbers and
///   the decimal strings this crate stores amounts as.
pub fn register_template_filters(tera: &mut Tera) {
    tera.register_filter("money", tera_money_filter);
}

fn tera_money_filter(
    value: &tera::Value,
    _args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    let amount = match value {
        tera::Value::Number(number) => number.as_f64().unwrap_or(0.0),
        tera::Value::String(raw) => raw.parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    Ok(tera::Value::String(format!("{amount:.2}")))
}

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("template error: {0}")]
    Template(String),
    #[error("conversion error: {0}")]
    Conversion(String),
    #[error("rendering timed out after {0}s")]
    Timeout(u64),
    #[error("wkhtmltopdf is not available")]
    WkhtmltopdfUnavailable,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct PdfRenderer {
    tera: Tera,
    wkhtmltopdf_path: Option<String>,
    output_dir: PathBuf,
    render_timeout: Duration,
    company: CompanyConfig,
}

impl PdfRenderer {
    /// Build a renderer from config: filesystem templates when a template
    /// directory is configured and loads, embedded templates otherwise.
    pub fn new(documents: &DocumentsConfig, company: CompanyConfig) -> Self {
        let tera = documents
            .template_dir
            .as_deref()
            .and_then(|dir| match Tera::new(&format!("{dir}/**/*")) {
                Ok(tera) if tera.get_template_names().any(|n| n == "quotation.html.tera") => {
                    info!(template_dir = dir, "loaded quotation templates from filesystem");
                    Some(tera)
                }
                Ok(_) => {
                    warn!(
                        template_dir = dir,
                        "template directory is missing quotation.html.tera; using embedded templates"
                    );
                    None
                }
                Err(error) => {
                    warn!(
                        template_dir = dir,
                        error = %error,
                        "failed to load template directory; using embedded templates"
                    );
                    None
                }
            });

        let mut tera = tera.unwrap_or_else(embedded_templates);
        register_template_filters(&mut tera);

        let wkhtmltopdf_path = documents
            .wkhtmltopdf_path
            .clone()
            .or_else(|| which::which("wkhtmltopdf").ok().map(|p| p.to_string_lossy().to_string()));
        match &wkhtmltopdf_path {
            Some(path) => info!(path = %path, "wkhtmltopdf found"),
            None => warn!("wkhtmltopdf not found in PATH; document generation will fail until it is installed"),
        }

        Self {
            tera,
            wkhtmltopdf_path,
            output_dir: documents.output_dir.clone(),
            render_timeout: Duration::from_secs(documents.render_timeout_secs),
            company,
        }
    }

    /// Renderer with embedded templates only; used by tests.
    pub fn with_embedded_templates(
        output_dir: PathBuf,
        render_timeout_secs: u64,
        company: CompanyConfig,
    ) -> Self {
        let mut tera = embedded_templates();
        register_template_filters(&mut tera);

        Self {
            tera,
            wkhtmltopdf_path: None,
            output_dir,
            render_timeout: Duration::from_secs(render_timeout_secs),
            company,
        }
    }

    /// Deterministic artifact name: reference number plus the generation
    /// instant, so regenerations never collide with a still-referenced
    /// older file.
    pub fn artifact_name(reference_number: &str, at: DateTime<Utc>) -> String {
        format!("{reference_number}-{}.pdf", at.timestamp_millis())
    }

    /// Artifact names are generated internally (reference + timestamp) and
    /// never contain path separators.
    pub fn artifact_path(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(file_name)
    }

    /// Render the quotation to a new PDF artifact on disk and return its
    /// file name. The caller owns updating the record pointer and removing
    /// the superseded artifact.
    pub async fn render(
        &self,
        quotation: &Quotation,
        client: &Client,
    ) -> Result<String, PdfError> {
        let html = self.render_html(quotation, client)?;
        let header_html = self.render_header_html()?;

        let wkhtmltopdf =
            self.wkhtmltopdf_path.as_deref().ok_or(PdfError::WkhtmltopdfUnavailable)?;
        let pdf_bytes = self.convert_html_to_pdf(&html, &header_html, wkhtmltopdf).await?;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let file_name = Self::artifact_name(&quotation.reference_number, Utc::now());
        tokio::fs::write(self.artifact_path(&file_name), &pdf_bytes).await?;

        info!(
            event_name = "quotation.document.generated",
            reference_number = %quotation.reference_number,
            file_name = %file_name,
            size = pdf_bytes.len(),
            "quotation PDF generated"
        );

        Ok(file_name)
    }

    /// Best-effort removal of a superseded artifact. Failure is logged and
    /// never fatal; a stray file is preferable to a failed update.
    pub async fn remove_artifact(&self, file_name: &str) {
        let path = self.artifact_path(file_name);
        if let Err(error) = tokio::fs::remove_file(&path).await {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    event_name = "quotation.document.cleanup_failed",
                    file_name = %file_name,
                    error = %error,
                    "failed to remove superseded artifact"
                );
            }
        }
    }

    pub fn render_html(
        &self,
        quotation: &Quotation,
        client: &Client,
    ) -> Result<String, PdfError> {
        let context = build_context(&self.company, quotation, client);
        self.tera
            .render("quotation.html.tera", &context)
            .map_err(|error| PdfError::Template(error.to_string()))
    }

    fn render_header_html(&self) -> Result<String, PdfError> {
        let mut context = Context::new();
        context.insert("company", &company_json(&self.company));
        self.tera
            .render("quotation_header.html.tera", &context)
            .map_err(|error| PdfError::Template(error.to_string()))
    }

    async fn convert_html_to_pdf(
        &self,
        html: &str,
        header_html: &str,
        wkhtmltopdf_path: &str,
    ) -> Result<Vec<u8>, PdfError> {
        let temp_dir = std::env::temp_dir();
        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let html_path = temp_dir.join(format!("quotation_{stamp}.html"));
        let header_path = temp_dir.join(format!("quotation_header_{stamp}.html"));
        let pdf_path = temp_dir.join(format!("quotation_{stamp}.pdf"));

        tokio::fs::write(&html_path, html).await?;
        tokio::fs::write(&header_path, header_html).await?;

        let output = Command::new(wkhtmltopdf_path)
            .arg("--page-size")
            .arg("A4")
            .arg("--encoding")
            .arg("utf-8")
            .arg("--enable-local-file-access")
            .arg("--header-html")
            .arg(&header_path)
            .arg("--header-spacing")
            .arg("5")
            .arg("--margin-top")
            .arg("32mm")
            .arg("--margin-bottom")
            .arg("15mm")
            .arg("--margin-left")
            .arg("12mm")
            .arg("--margin-right")
            .arg("12mm")
            .arg(&html_path)
            .arg(&pdf_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.render_timeout, output).await {
            Ok(result) => result?,
            Err(_) => {
                cleanup_temp_files(&[&html_path, &header_path, &pdf_path]).await;
                return Err(PdfError::Timeout(self.render_timeout.as_secs()));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            cleanup_temp_files(&[&html_path, &header_path, &pdf_path]).await;
            return Err(PdfError::Conversion(stderr));
        }

        let pdf_bytes = tokio::fs::read(&pdf_path).await?;
        cleanup_temp_files(&[&html_path, &header_path, &pdf_path]).await;

        Ok(pdf_bytes)
    }
}

async fn cleanup_temp_files(paths: &[&PathBuf]) {
    for path in paths {
        let _ = tokio::fs::remove_file(path).await;
    }
}

fn embedded_templates() -> Tera {
    let mut tera = Tera::default();
    tera.add_raw_template(
        "quotation.html.tera",
        include_str!("../../../templates/quotation.html.tera"),
    )
    .expect("embedded quotation template must parse");
    tera.add_raw_template(
        "quotation_header.html.tera",
        include_str!("../../../templates/quotation_header.html.tera"),
    )
    .expect("embedded header template must parse");
    tera
}

fn company_json(company: &CompanyConfig) -> serde_json::Value {
    serde_json::json!({
        "name": company.name,
        "address": company.address,
        "phone": company.phone,
        "email": company.email,
        "website": company.website,
        "tagline": company.tagline,
    })
}

fn build_context(company: &CompanyConfig, quotation: &Quotation, client: &Client) -> Context {
    let mut context = Context::new();

    context.insert("company", &company_json(company));

    context.insert(
        "quotation",
        &serde_json::json!({
            "reference_number": quotation.reference_number,
            "title": quotation.title,
            "subject": quotation.subject,
            "formal_message": quotation.formal_message,
            "date": quotation.created_at.format("%d %b %Y").to_string(),
            "status": quotation.status.as_str(),
            "notes": quotation.notes.clone().unwrap_or_default(),
            "billing_details": quotation.billing_details,
            "supply": quotation.supply,
            "installation_and_commissioning": quotation.installation_and_commissioning,
            "terms_and_conditions": quotation.terms_and_conditions,
            "signature_image": quotation.signature_image.clone().unwrap_or_default(),
            "tax_enabled": quotation.tax_enabled,
            "tax_rate_percent": format!("{}", quotation.tax_rate_percent.normalize()),
        }),
    );

    let address_block = [
        client.address.as_deref(),
        client.place.as_deref(),
        client.city.as_deref(),
        client.state.as_deref(),
        client.pin.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(", ");

    context.insert(
        "client",
        &serde_json::json!({
            "name": client.name,
            "position": client.position.clone().unwrap_or_default(),
            "company_name": client.company_name,
            "address_block": address_block,
            "emails": client.emails,
            "phones": client.phones,
        }),
    );

    let lines: Vec<serde_json::Value> = quotation
        .line_items
        .iter()
        .map(|line| {
            serde_json::json!({
                "title": line.title,
                "model": line.model.clone().unwrap_or_default(),
                "specification": line.specification.clone().unwrap_or_default(),
                "unit": line.unit,
                "quantity": line.quantity,
                "unit_price": line.unit_price.to_string(),
                "line_total": line.line_total.to_string(),
                "notes": line.notes.clone().unwrap_or_default(),
                "terms_and_conditions": line.terms_and_conditions.clone().unwrap_or_default(),
            })
        })
        .collect();
    context.insert("lines", &lines);

    let installation = match &quotation.machine_installation {
        Some(block) => serde_json::json!({
            "quantity": block.quantity,
            "unit": block.unit,
            "unit_price": block.unit_price.to_string(),
            "total": block.total.to_string(),
        }),
        None => serde_json::Value::Null,
    };
    context.insert("installation", &installation);

    let gallery = |items: &[quotar_core::domain::quotation::GalleryItem]| -> Vec<serde_json::Value> {
        items
            .iter()
            .map(|item| {
                serde_json::json!({
                    "image": item.image.clone().unwrap_or_default(),
                    "model": item.model.clone().unwrap_or_default(),
                    "specification": item.specification.clone().unwrap_or_default(),
                })
            })
            .collect()
    };
    context.insert("related_products", &gallery(&quotation.related_products));
    context.insert("suggested_products", &gallery(&quotation.suggested_products));

    let tax = pricing::tax_amount(quotation.total_amount, quotation.tax_rate_percent);
    let grand = if quotation.tax_enabled {
        pricing::round_money(quotation.total_amount + tax)
    } else {
        quotation.total_amount
    };
    context.insert(
        "totals",
        &serde_json::json!({
            "subtotal": quotation.total_amount.to_string(),
            "tax": tax.to_string(),
            "grand": grand.to_string(),
        }),
    );

    context
}
