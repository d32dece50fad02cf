use std::fmt::Write;

use anyhow::Result;
use prettytable::{
    format::{LinePosition, LineSeparator, TableFormat},
    row,
    Table,
};
use pos_api_client::{Deposit, Merchant, Order, Report};
use qrcode::{render::unicode, QrCode};

fn markdown_format() -> TableFormat {
    prettytable::format::FormatBuilder::new()
        .column_separator('|')
        .borders('|')
        .separator(LinePosition::Title, LineSeparator::new('-', '|', '|', '|'))
        .padding(1, 1)
        .build()
}

fn markdown_style(table: &mut Table) {
    table.set_format(markdown_format());
}

pub fn qr_code(payload: &str) -> String {
    QrCode::new(payload)
        .map(|code| {
            code.render::<unicode::Dense1x2>()
                .dark_color(unicode::Dense1x2::Dark)
                .light_color(unicode::Dense1x2::Light)
                .quiet_zone(true)
                .build()
        })
        .unwrap_or_default()
}

pub fn format_order(order: &Order) -> Result<String> {
    let mut f = String::new();
    writeln!(f, "Order {:<30} Status: {}", order.order_id.to_string(), order.status)?;
    if let Some(number) = &order.order_number {
        writeln!(f, "Order number: {number}")?;
    }
    writeln!(f, "Amount: {} {} ({} USD)", order.display_amount, order.display_currency, order.required_amount_usd)?;
    if let Some(description) = &order.description {
        writeln!(f, "Description: {description}")?;
    }
    writeln!(f, "Created: {}", order.created_at)?;
    if let Some(updated) = order.updated_at {
        writeln!(f, "Updated: {updated}")?;
    }
    Ok(f)
}

pub fn format_order_with_qr_code(order: &Order) -> Result<String> {
    let mut f = format_order(order)?;
    match &order.qrcode {
        Some(link) => {
            writeln!(f, "Scan to pay: {link}")?;
            writeln!(f, "{}", qr_code(link))?;
        },
        None => writeln!(f, "The server did not return a payment link for this order")?,
    }
    Ok(f)
}

pub fn format_orders(orders: &[Order]) -> String {
    if orders.is_empty() {
        return "No orders".to_string();
    }
    let mut table = Table::new();
    table.set_titles(row!["Order id", "Number", "Status", "Amount", "Currency", "USD", "Description", "Created At"]);
    orders.iter().for_each(|order| {
        table.add_row(row![
            order.order_id.as_str(),
            order.order_number.as_deref().unwrap_or_default(),
            order.status.to_string(),
            order.display_amount.to_string(),
            order.display_currency,
            order.required_amount_usd.to_string(),
            order.description.as_deref().unwrap_or_default(),
            order.created_at.format("%Y-%m-%d %H:%M").to_string()
        ]);
    });
    markdown_style(&mut table);
    table.to_string()
}

pub fn format_deposit(deposit: &Deposit) -> Result<String> {
    let mut f = String::new();
    writeln!(f, "Deposit {:<28} Status: {}", deposit.deposit_id.to_string(), deposit.status)?;
    writeln!(f, "Amount: {} {}", deposit.amount, deposit.currency)?;
    writeln!(f, "Created: {}", deposit.created_at)?;
    if let Some(url) = &deposit.payment_url {
        writeln!(f, "Pay at: {url}")?;
        writeln!(f, "{}", qr_code(url))?;
    }
    Ok(f)
}

pub fn format_deposits(deposits: &[Deposit]) -> String {
    if deposits.is_empty() {
        return "No deposits".to_string();
    }
    let mut table = Table::new();
    table.set_titles(row!["Deposit id", "Status", "Amount", "Currency", "Created At"]);
    deposits.iter().for_each(|d| {
        table.add_row(row![
            d.deposit_id.as_str(),
            d.status.to_string(),
            d.amount.to_string(),
            d.currency,
            d.created_at.format("%Y-%m-%d %H:%M").to_string()
        ]);
    });
    markdown_style(&mut table);
    table.to_string()
}

pub fn format_merchant(merchant: &Merchant) -> Result<String> {
    let mut f = String::new();
    writeln!(f, "Merchant: {}", merchant.merchant_id)?;
    writeln!(f, "Name: {}", merchant.display_name.as_deref().unwrap_or("(not set)"))?;
    if let Some(email) = &merchant.email {
        writeln!(f, "Email: {email}")?;
    }
    writeln!(f, "Default currency: {}", merchant.default_currency)?;
    if let Some(language) = &merchant.default_language {
        writeln!(f, "Language: {language}")?;
    }
    writeln!(f, "EVM wallet: {}", merchant.wallet_address.as_deref().unwrap_or("(not set)"))?;
    writeln!(f, "Stellar wallet: {}", merchant.stellar_address.as_deref().unwrap_or("(not set)"))?;
    Ok(f)
}

pub fn format_report(report: &Report) -> Result<String> {
    let mut f = String::new();
    let summary = &report.summary;
    writeln!(f, "===============================================================================")?;
    writeln!(
        f,
        "{total:>6} orders ({completed} completed). Total value: {amount} USD",
        total = summary.total_orders,
        completed = summary.completed_orders,
        amount = summary.total_amount_usd
    )?;
    writeln!(f, "===============================================================================")?;
    if report.groups.is_empty() {
        writeln!(f, "No sales in this period")?;
        return Ok(f);
    }
    let mut table = Table::new();
    table.set_titles(row!["Period", "Orders", "Amount (USD)"]);
    report.groups.iter().for_each(|g| {
        table.add_row(row![g.period, g.total_orders.to_string(), g.total_amount_usd.to_string()]);
    });
    markdown_style(&mut table);
    writeln!(f, "{table}")?;
    Ok(f)
}

#[cfg(test)]
mod test {
    use chrono::{TimeZone, Utc};
    use pos_api_client::{MerchantId, OrderId, OrderStatus, ReportBucket, ReportSummary};
    use rust_decimal_macros::dec;

    use super::*;

    fn order() -> Order {
        Order {
            order_id: OrderId::new("ord_1"),
            merchant_id: MerchantId::new("m1"),
            order_number: Some("1001".into()),
            status: OrderStatus::Pending,
            display_amount: dec!(12.5),
            display_currency: "EUR".into(),
            required_amount_usd: dec!(13.4),
            payment_id: Some("pay_1".into()),
            qrcode: Some("https://pay.example.com/checkout/pay_1".into()),
            description: Some("Flat white".into()),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap(),
            updated_at: None,
        }
    }

    #[test]
    fn order_details_include_qr_code() {
        let s = format_order_with_qr_code(&order()).unwrap();
        assert!(s.contains("Order #ord_1"));
        assert!(s.contains("12.5 EUR (13.4 USD)"));
        assert!(s.contains("Scan to pay: https://pay.example.com/checkout/pay_1"));
        assert!(s.contains('█') || s.contains('▀') || s.contains('▄'));
    }

    #[test]
    fn order_table() {
        assert_eq!(format_orders(&[]), "No orders");
        let s = format_orders(&[order()]);
        assert!(s.contains("| ord_1 "));
        assert!(s.contains("Flat white"));
        assert!(s.contains("2024-05-01 10:30"));
    }

    #[test]
    fn report_table() {
        let report = Report {
            summary: ReportSummary { total_orders: 3, completed_orders: 2, total_amount_usd: dec!(40) },
            groups: vec![ReportBucket { period: "2024-05-01".into(), total_orders: 3, total_amount_usd: dec!(40) }],
        };
        let s = format_report(&report).unwrap();
        assert!(s.contains("3 orders (2 completed). Total value: 40 USD"));
        assert!(s.contains("2024-05-01"));
        assert!(format_report(&Report::default()).unwrap().contains("No sales in this period"));
    }
}
