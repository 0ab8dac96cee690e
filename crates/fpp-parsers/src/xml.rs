//! XML report dialects.
//!
//! Both dialects are read through a small namespace-stripped node tree so
//! the extraction code can navigate by local element names regardless of
//! prefixes or schema-version namespaces.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use fpp_core::{locale, FundSnapshot, PositionAttributes, PositionRecord};

use crate::{instrument_key, ParseError, ParsedReport, RawReport};

#[derive(Debug, Default)]
pub(crate) struct XmlNode {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    fn named(name: String) -> XmlNode {
        XmlNode {
            name,
            ..Default::default()
        }
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children
            .iter()
            .filter(move |c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn descend(&self, path: &[&str]) -> Option<&XmlNode> {
        let mut node = self;
        for step in path {
            node = node.child(step)?;
        }
        Some(node)
    }

    pub fn text_at(&self, path: &[&str]) -> Option<&str> {
        let node = self.descend(path)?;
        let text = node.text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Local name of the first element, for cheap dialect sniffing.
pub(crate) fn root_element(bytes: &[u8]) -> Option<String> {
    let head = fpp_core::locale::decode_xml(&bytes[..bytes.len().min(512)]);
    let mut rest = head.as_str();
    while let Some(open) = rest.find('<') {
        let tail = &rest[open + 1..];
        if tail.starts_with('?') || tail.starts_with('!') {
            rest = tail;
            continue;
        }
        let name: String = tail
            .chars()
            .take_while(|c| !c.is_whitespace() && *c != '>' && *c != '/')
            .collect();
        if name.is_empty() {
            return None;
        }
        // Drop a namespace prefix if present.
        return Some(name.rsplit(':').next().unwrap_or(&name).to_string());
    }
    None
}

fn strip_prefix(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    name.rsplit(':').next().unwrap_or(&name).to_string()
}

pub(crate) fn parse_tree(text: &str) -> Result<XmlNode, String> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);
    let mut stack: Vec<XmlNode> = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                stack.push(XmlNode::named(strip_prefix(start.name().as_ref())));
            }
            Ok(Event::Empty(start)) => {
                let node = XmlNode::named(strip_prefix(start.name().as_ref()));
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Ok(node),
                }
            }
            Ok(Event::Text(text)) => {
                let unescaped = text.unescape().map_err(|e| e.to_string())?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(unescaped.trim());
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(top) = stack.last_mut() {
                    top.text
                        .push_str(String::from_utf8_lossy(&data.into_inner()).trim());
                }
            }
            Ok(Event::End(_)) => {
                let node = match stack.pop() {
                    Some(node) => node,
                    None => return Err("closing tag without opener".into()),
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Ok(node),
                }
            }
            Ok(Event::Eof) => return Err("document ended before the root closed".into()),
            Ok(_) => {}
            Err(err) => return Err(err.to_string()),
        }
    }
}

fn tree_for(report: &RawReport) -> Result<XmlNode, ParseError> {
    let text = locale::decode_xml(&report.bytes);
    parse_tree(&text).map_err(|detail| ParseError::Xml {
        file: report.file_name.clone(),
        detail,
    })
}

fn missing(report: &RawReport, section: &str) -> ParseError {
    ParseError::MissingSection {
        file: report.file_name.clone(),
        section: section.to_string(),
    }
}

fn number(report: &RawReport, field: &str, value: &str) -> Result<f64, ParseError> {
    locale::parse_decimal(value).map_err(|_| ParseError::BadNumber {
        file: report.file_name.clone(),
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn date(report: &RawReport, value: &str) -> Result<chrono::NaiveDate, ParseError> {
    locale::parse_date(value).map_err(|_| ParseError::BadDate {
        file: report.file_name.clone(),
        value: value.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Current dialect: securities balance statement.

/// Proprietary id schemes attached to each sub-balance.
const SCHEME_LEVEL: &str = "NIVEL 1";
const SCHEME_TICKER: &str = "TICKER";
const SCHEME_EXCHANGE: &str = "ATIVOSB3";
const SCHEME_INSTITUTION: &str = "INSTITUICAO";

pub(crate) fn parse_current(report: &RawReport) -> Result<ParsedReport, ParseError> {
    let root = tree_for(report)?;
    let stmt = root
        .child("SctiesBalAcctgRpt")
        .ok_or_else(|| missing(report, "SctiesBalAcctgRpt"))?;

    let date_text = stmt
        .text_at(&["StmtGnlDtls", "StmtDtTm", "Dt"])
        .ok_or_else(|| missing(report, "StmtGnlDtls/StmtDtTm/Dt"))?;
    let reference_date = date(report, date_text)?;

    // Net asset value comes from whichever of three locations the emitter
    // chose to fill.
    let nav_text = stmt
        .text_at(&["AcctBaseCcyTtlAmts", "TtlHldgsValOfStmt", "Amt"])
        .or_else(|| stmt.text_at(&["StmtGnlDtls", "TtlNetVal", "Amt"]))
        .or_else(|| stmt.text_at(&["BalForAcct", "AcctBaseCcyAmts", "HldgVal", "Amt"]))
        .ok_or_else(|| missing(report, "net asset value"))?;
    let net_asset_value = number(report, "net asset value", nav_text)?;

    let balance = stmt.child("BalForAcct");
    let quota_quantity = balance
        .and_then(|b| b.text_at(&["AggtBal", "Qty", "Qty", "Qty", "Unit"]))
        .and_then(|v| locale::parse_decimal(v).ok());
    let mut quota_gross = None;
    let mut quota_net = None;
    if let Some(balance) = balance {
        for price in balance.children_named("PricDtls") {
            let code = price.text_at(&["Tp", "Cd"]).unwrap_or_default();
            let value = price
                .text_at(&["Val", "Amt"])
                .and_then(|v| locale::parse_decimal(v).ok());
            match code {
                "NAVL" => quota_gross = value,
                "INTE" => quota_net = value,
                _ => {}
            }
        }
    }

    let mut records = Vec::new();
    let mut used = HashMap::new();
    for sub_account in stmt.children_named("SubAcctDtls") {
        for item in sub_account.children_named("BalForSubAcct") {
            if let Some(record) = sub_balance_record(report, item, reference_date, &mut used)? {
                records.push(record);
            }
        }
    }
    if let Some(balance) = balance {
        for breakdown in balance.children_named("BalBrkdwn") {
            if let Some(record) = breakdown_record(report, breakdown, reference_date, &mut used)? {
                records.push(record);
            }
        }
    }

    Ok(ParsedReport {
        reference_date,
        snapshot: Some(FundSnapshot {
            fund_local_id: report.fund_local_id,
            reference_date,
            net_asset_value,
            quota_value: quota_gross.or(quota_net),
            quota_quantity,
        }),
        records,
    })
}

fn sub_balance_record(
    report: &RawReport,
    item: &XmlNode,
    reference_date: chrono::NaiveDate,
    used: &mut HashMap<String, u32>,
) -> Result<Option<PositionRecord>, ParseError> {
    let instrument = item
        .child("FinInstrmId")
        .or_else(|| item.descend(&["FinInstrmDtls", "FinInstrmId"]));
    let mut ids: HashMap<String, String> = HashMap::new();
    if let Some(instrument) = instrument {
        for other in instrument.children_named("OthrId") {
            let scheme = other
                .text_at(&["Tp", "Prtry"])
                .unwrap_or_default()
                .to_uppercase();
            if let Some(id) = other.text_at(&["Id"]) {
                ids.insert(scheme, id.to_string());
            }
        }
    }
    let description = instrument
        .and_then(|i| i.text_at(&["Desc"]))
        .or_else(|| item.text_at(&["FinInstrmDtls", "Desc"]))
        .unwrap_or("sem descrição")
        .to_string();
    let currency = instrument
        .and_then(|i| i.text_at(&["DnmtnCcy"]))
        .unwrap_or("BRL")
        .to_string();

    let value_text = item
        .text_at(&["AcctBaseCcyAmts", "HldgVal", "Amt"])
        .or_else(|| item.text_at(&["HldgVal", "Amt"]));
    let value = match value_text {
        Some(text) => number(report, &format!("holding value of {description}"), text)?,
        // A sub-balance without a holding value carries no position.
        None => return Ok(None),
    };
    let quantity = item
        .text_at(&["AggtBal", "Qty", "Qty", "Qty", "Unit"])
        .and_then(|v| locale::parse_decimal(v).ok())
        .unwrap_or(0.0);
    let unit_price = if quantity.abs() > f64::EPSILON {
        value / quantity
    } else {
        0.0
    };

    let level = ids.get(SCHEME_LEVEL).map(String::as_str).unwrap_or("");
    let attributes = match level.to_uppercase().as_str() {
        "CASH" => PositionAttributes::Cash {
            description: description.clone(),
            institution: ids.get(SCHEME_INSTITUTION).cloned(),
            currency,
            balance: value,
        },
        "EQUI" | "ACOES" => {
            let ticker = ids
                .get(SCHEME_TICKER)
                .or_else(|| ids.get(SCHEME_EXCHANGE))
                .cloned()
                .unwrap_or_else(|| description.clone());
            PositionAttributes::Equity {
                ticker,
                description: description.clone(),
                quantity,
                unit_price,
                market_value: value,
            }
        }
        // Credit instruments, fund quotas and anything unclassified all
        // settle like fixed income in the primary store.
        _ => PositionAttributes::FixedIncome {
            description: description.clone(),
            issuer: ids.get(SCHEME_INSTITUTION).cloned(),
            quantity,
            unit_price,
            market_value: value,
            rate: None,
            maturity: None,
        },
    };

    let key_base = ids
        .get(SCHEME_TICKER)
        .or_else(|| ids.get(SCHEME_EXCHANGE))
        .map(String::as_str)
        .unwrap_or(&description);
    Ok(Some(PositionRecord {
        fund_local_id: report.fund_local_id,
        reference_date,
        instrument_key: instrument_key(key_base, used),
        attributes,
    }))
}

fn breakdown_record(
    report: &RawReport,
    breakdown: &XmlNode,
    reference_date: chrono::NaiveDate,
    used: &mut HashMap<String, u32>,
) -> Result<Option<PositionRecord>, ParseError> {
    let proprietary = match breakdown.descend(&["SubBalTp", "Prtry"]) {
        Some(node) => node,
        None => return Ok(None),
    };
    let scheme = proprietary
        .text_at(&["SchmeNm", "Id"])
        .unwrap_or_default()
        .to_uppercase();
    let description = proprietary
        .text_at(&["Id"])
        .unwrap_or("provisão")
        .to_string();
    let amount_text = breakdown
        .text_at(&["Qty", "Qty", "FaceAmt"])
        .or_else(|| breakdown.text_at(&["Qty", "Qty", "Amt"]));
    let amount = match amount_text {
        Some(text) => number(report, &format!("breakdown amount of {description}"), text)?,
        None => return Ok(None),
    };

    let attributes = if scheme.contains("PAYABLE") {
        PositionAttributes::Accrual {
            description: description.clone(),
            due_date: None,
            amount: -amount.abs(),
        }
    } else if scheme.contains("RECEIVABLE") {
        PositionAttributes::Receivable {
            description: description.clone(),
            due_date: None,
            amount: amount.abs(),
        }
    } else {
        return Ok(None);
    };
    Ok(Some(PositionRecord {
        fund_local_id: report.fund_local_id,
        reference_date,
        instrument_key: instrument_key(&description, used),
        attributes,
    }))
}

// ---------------------------------------------------------------------------
// Legacy dialect: elder fund-position schema, 8-bit encoded.

pub(crate) fn parse_legacy(report: &RawReport) -> Result<ParsedReport, ParseError> {
    let root = tree_for(report)?;
    let fund = root
        .child("fundo")
        .ok_or_else(|| missing(report, "fundo"))?;
    let header = fund
        .child("header")
        .ok_or_else(|| missing(report, "header"))?;

    let date_text = header
        .text_at(&["dtposicao"])
        .ok_or_else(|| missing(report, "header/dtposicao"))?;
    let reference_date = date(report, date_text)?;
    let nav_text = header
        .text_at(&["patliq"])
        .ok_or_else(|| missing(report, "header/patliq"))?;
    let net_asset_value = number(report, "patliq", nav_text)?;
    let quota_value = header
        .text_at(&["valorcota"])
        .and_then(|v| locale::parse_decimal(v).ok());
    let quota_quantity = header
        .text_at(&["quantidade"])
        .and_then(|v| locale::parse_decimal(v).ok());

    let mut records = Vec::new();
    let mut used = HashMap::new();

    for cash in fund.children_named("caixa") {
        let institution = cash.text_at(&["isininstituicao"]).map(str::to_string);
        let description = cash
            .text_at(&["tpconta"])
            .unwrap_or("conta corrente")
            .to_string();
        let balance_text = cash
            .text_at(&["saldofinal"])
            .or_else(|| cash.text_at(&["saldo"]))
            .ok_or_else(|| missing(report, "caixa/saldo"))?;
        let balance = number(report, "caixa/saldo", balance_text)?;
        let key_base = institution.clone().unwrap_or_else(|| description.clone());
        records.push(PositionRecord {
            fund_local_id: report.fund_local_id,
            reference_date,
            instrument_key: instrument_key(&key_base, &mut used),
            attributes: PositionAttributes::Cash {
                description,
                institution,
                currency: "BRL".into(),
                balance,
            },
        });
    }

    for equity in fund.children_named("acoes") {
        let ticker = equity
            .text_at(&["codativo"])
            .ok_or_else(|| missing(report, "acoes/codativo"))?
            .to_string();
        let quantity = number(
            report,
            "acoes/qtdisponivel",
            equity.text_at(&["qtdisponivel"]).unwrap_or("0"),
        )?;
        let unit_price = number(
            report,
            "acoes/puposicao",
            equity.text_at(&["puposicao"]).unwrap_or("0"),
        )?;
        let market_value = match equity.text_at(&["valorfindisp"]) {
            Some(text) => number(report, "acoes/valorfindisp", text)?,
            None => quantity * unit_price,
        };
        records.push(PositionRecord {
            fund_local_id: report.fund_local_id,
            reference_date,
            instrument_key: instrument_key(&ticker, &mut used),
            attributes: PositionAttributes::Equity {
                ticker: ticker.clone(),
                description: ticker,
                quantity,
                unit_price,
                market_value,
            },
        });
    }

    for section in ["titprivado", "titpublico"] {
        for security in fund.children_named(section) {
            let code = security
                .text_at(&["codativo"])
                .or_else(|| security.text_at(&["isin"]))
                .unwrap_or("título")
                .to_string();
            let quantity = number(
                report,
                "qtdisponivel",
                security.text_at(&["qtdisponivel"]).unwrap_or("0"),
            )?;
            let unit_price = number(
                report,
                "puposicao",
                security.text_at(&["puposicao"]).unwrap_or("0"),
            )?;
            let market_value = match security.text_at(&["valorfindisp"]) {
                Some(text) => number(report, "valorfindisp", text)?,
                None => quantity * unit_price,
            };
            let maturity = security
                .text_at(&["dtvencimento"])
                .and_then(|v| locale::parse_date(v).ok());
            records.push(PositionRecord {
                fund_local_id: report.fund_local_id,
                reference_date,
                instrument_key: instrument_key(&code, &mut used),
                attributes: PositionAttributes::FixedIncome {
                    description: code.clone(),
                    issuer: None,
                    quantity,
                    unit_price,
                    market_value,
                    rate: security.text_at(&["coupom"]).map(str::to_string),
                    maturity,
                },
            });
        }
    }

    for provision in fund.children_named("provisao") {
        let description = provision
            .text_at(&["codprov"])
            .unwrap_or("provisão")
            .to_string();
        let amount_text = provision
            .text_at(&["valor"])
            .ok_or_else(|| missing(report, "provisao/valor"))?;
        let amount = number(report, "provisao/valor", amount_text)?;
        let due_date = provision
            .text_at(&["dt"])
            .and_then(|v| locale::parse_date(v).ok());
        let debit = provision
            .text_at(&["credeb"])
            .is_some_and(|f| f.eq_ignore_ascii_case("D"));
        let attributes = if debit {
            PositionAttributes::Accrual {
                description: description.clone(),
                due_date,
                amount: -amount.abs(),
            }
        } else {
            PositionAttributes::Receivable {
                description: description.clone(),
                due_date,
                amount: amount.abs(),
            }
        };
        records.push(PositionRecord {
            fund_local_id: report.fund_local_id,
            reference_date,
            instrument_key: instrument_key(&description, &mut used),
            attributes,
        });
    }

    Ok(ParsedReport {
        reference_date,
        snapshot: Some(FundSnapshot {
            fund_local_id: report.fund_local_id,
            reference_date,
            net_asset_value,
            quota_value,
            quota_quantity,
        }),
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpp_core::PositionCategory;

    fn raw(name: &str, body: &str) -> RawReport {
        RawReport {
            file_name: name.into(),
            fund_local_id: 7,
            bytes: body.as_bytes().to_vec(),
        }
    }

    const CURRENT_SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Document xmlns="urn:iso:std:iso:20022:tech:xsd:semt.003.001.09">
  <SctiesBalAcctgRpt>
    <StmtGnlDtls>
      <StmtDtTm><Dt>2025-03-01</Dt></StmtDtTm>
    </StmtGnlDtls>
    <AcctBaseCcyTtlAmts>
      <TtlHldgsValOfStmt><Amt>1500000.00</Amt></TtlHldgsValOfStmt>
    </AcctBaseCcyTtlAmts>
    <BalForAcct>
      <AggtBal><Qty><Qty><Qty><Unit>100000</Unit></Qty></Qty></Qty></AggtBal>
      <PricDtls><Tp><Cd>NAVL</Cd></Tp><Val><Amt>15.0</Amt></Val></PricDtls>
      <PricDtls><Tp><Cd>INTE</Cd></Tp><Val><Amt>14.8</Amt></Val></PricDtls>
      <BalBrkdwn>
        <SubBalTp><Prtry><Id>Taxa de administração</Id><SchmeNm><Id>PAYABLES</Id></SchmeNm></Prtry></SubBalTp>
        <Qty><Qty><FaceAmt>2500.00</FaceAmt></Qty></Qty>
      </BalBrkdwn>
      <BalBrkdwn>
        <SubBalTp><Prtry><Id>Dividendos a receber</Id><SchmeNm><Id>RECEIVABLES</Id></SchmeNm></Prtry></SubBalTp>
        <Qty><Qty><FaceAmt>1200.00</FaceAmt></Qty></Qty>
      </BalBrkdwn>
    </BalForAcct>
    <SubAcctDtls>
      <BalForSubAcct>
        <FinInstrmId>
          <OthrId><Id>CASH</Id><Tp><Prtry>NIVEL 1</Prtry></Tp></OthrId>
          <OthrId><Id>Banco Alfa</Id><Tp><Prtry>INSTITUICAO</Prtry></Tp></OthrId>
          <Desc>Conta corrente</Desc>
          <DnmtnCcy>BRL</DnmtnCcy>
        </FinInstrmId>
        <AcctBaseCcyAmts><HldgVal><Amt>50000.00</Amt></HldgVal></AcctBaseCcyAmts>
      </BalForSubAcct>
      <BalForSubAcct>
        <FinInstrmId>
          <OthrId><Id>EQUI</Id><Tp><Prtry>NIVEL 1</Prtry></Tp></OthrId>
          <OthrId><Id>PETR4</Id><Tp><Prtry>TICKER</Prtry></Tp></OthrId>
          <Desc>Petrobras PN</Desc>
        </FinInstrmId>
        <AggtBal><Qty><Qty><Qty><Unit>1000</Unit></Qty></Qty></Qty></AggtBal>
        <AcctBaseCcyAmts><HldgVal><Amt>38000.00</Amt></HldgVal></AcctBaseCcyAmts>
      </BalForSubAcct>
    </SubAcctDtls>
  </SctiesBalAcctgRpt>
</Document>"#;

    const LEGACY_SAMPLE: &str = r#"<?xml version="1.0" encoding="ISO-8859-1"?>
<arquivoposicao_4_01>
  <fundo>
    <header>
      <cnpj>00000000000100</cnpj>
      <nome>FIP TESTE</nome>
      <dtposicao>20250301</dtposicao>
      <patliq>1500000.00</patliq>
      <valorcota>15.0</valorcota>
      <quantidade>100000</quantidade>
    </header>
    <caixa>
      <isininstituicao>Banco Alfa</isininstituicao>
      <tpconta>conta corrente</tpconta>
      <saldo>50000.00</saldo>
    </caixa>
    <acoes>
      <codativo>PETR4</codativo>
      <qtdisponivel>1000</qtdisponivel>
      <puposicao>38.0</puposicao>
      <valorfindisp>38000.00</valorfindisp>
    </acoes>
    <titprivado>
      <codativo>CDB BANCO BETA</codativo>
      <qtdisponivel>10</qtdisponivel>
      <puposicao>1000.0</puposicao>
      <dtvencimento>20260301</dtvencimento>
      <coupom>12.5</coupom>
    </titprivado>
    <provisao>
      <codprov>Taxa de administração</codprov>
      <credeb>D</credeb>
      <dt>20250310</dt>
      <valor>2500.00</valor>
    </provisao>
  </fundo>
</arquivoposicao_4_01>"#;

    #[test]
    fn current_dialect_parses_statement() {
        let report = raw("01.03 - Carteira XML - FIP.xml", CURRENT_SAMPLE);
        let parsed = parse_current(&report).unwrap();
        assert_eq!(parsed.reference_date.to_string(), "2025-03-01");
        let snapshot = parsed.snapshot.unwrap();
        assert_eq!(snapshot.net_asset_value, 1_500_000.0);
        assert_eq!(snapshot.quota_value, Some(15.0));
        assert_eq!(snapshot.quota_quantity, Some(100_000.0));

        assert_eq!(parsed.records.len(), 4);
        let categories: Vec<PositionCategory> = parsed
            .records
            .iter()
            .map(|r| r.attributes.category())
            .collect();
        assert!(categories.contains(&PositionCategory::Cash));
        assert!(categories.contains(&PositionCategory::Equity));
        assert!(categories.contains(&PositionCategory::Accrual));
        assert!(categories.contains(&PositionCategory::Receivable));

        let payable = parsed
            .records
            .iter()
            .find(|r| r.attributes.category() == PositionCategory::Accrual)
            .unwrap();
        assert_eq!(payable.attributes.value(), -2500.0);
        let equity = parsed
            .records
            .iter()
            .find(|r| r.attributes.category() == PositionCategory::Equity)
            .unwrap();
        assert_eq!(equity.instrument_key, "petr4");
        assert_eq!(equity.attributes.value(), 38_000.0);
    }

    #[test]
    fn legacy_dialect_parses_sections() {
        let report = raw("01.03 - Carteira XML 4.01 - FIP.xml", LEGACY_SAMPLE);
        let parsed = parse_legacy(&report).unwrap();
        assert_eq!(parsed.reference_date.to_string(), "2025-03-01");
        assert_eq!(parsed.snapshot.as_ref().unwrap().net_asset_value, 1_500_000.0);
        assert_eq!(parsed.records.len(), 4);

        let credit = parsed
            .records
            .iter()
            .find(|r| r.attributes.category() == PositionCategory::FixedIncome)
            .unwrap();
        match &credit.attributes {
            PositionAttributes::FixedIncome {
                market_value,
                rate,
                maturity,
                ..
            } => {
                assert_eq!(*market_value, 10_000.0);
                assert_eq!(rate.as_deref(), Some("12.5"));
                assert_eq!(maturity.unwrap().to_string(), "2026-03-01");
            }
            other => panic!("unexpected attributes: {other:?}"),
        }
        let provision = parsed
            .records
            .iter()
            .find(|r| r.attributes.category() == PositionCategory::Accrual)
            .unwrap();
        assert_eq!(provision.attributes.value(), -2500.0);
    }

    #[test]
    fn dialects_with_shared_tag_names_route_to_their_own_parser() {
        let current = raw("a.xml", CURRENT_SAMPLE);
        let legacy = raw("b.xml", LEGACY_SAMPLE);
        assert!(crate::ReportParser::CurrentXml.can_parse(&current));
        assert!(!crate::ReportParser::CurrentXml.can_parse(&legacy));
        assert!(crate::ReportParser::LegacyXml.can_parse(&legacy));
        assert!(!crate::ReportParser::LegacyXml.can_parse(&current));

        let via_dispatch = crate::parse_report(&legacy).unwrap();
        assert_eq!(via_dispatch.records.len(), 4);
    }

    #[test]
    fn missing_statement_date_is_named() {
        let body = r#"<Document><SctiesBalAcctgRpt><StmtGnlDtls/></SctiesBalAcctgRpt></Document>"#;
        let err = parse_current(&raw("sem-data.xml", body)).unwrap_err();
        match err {
            ParseError::MissingSection { section, .. } => {
                assert!(section.contains("StmtDtTm"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn root_sniffing_ignores_declaration_and_prefixes() {
        assert_eq!(
            root_element(b"<?xml version=\"1.0\"?><ns2:Document xmlns=\"x\">").as_deref(),
            Some("Document")
        );
        assert_eq!(
            root_element(b"<arquivoposicao_4_01>").as_deref(),
            Some("arquivoposicao_4_01")
        );
        assert_eq!(root_element(b"not xml"), None);
    }
}
