//! Sales-flavoured registry shared by unit tests.

use crate::query::ast::{Domain, Operand, Operator};
use crate::query::value::Value;
use crate::schema::{FieldDescriptor, ModelBuilder, Registry, ValueType};

fn vip_search(operator: Operator, operand: &Operand) -> Result<Domain, crate::query::errors::DomainError> {
    let wants_vip = (operator == Operator::In) == operand.values().contains(&Value::Bool(true));
    let vip = Domain::eq("category_ids.name", "VIP");
    Ok(if wants_vip { vip } else { !vip })
}

pub(crate) fn sale_registry() -> Registry {
    Registry::builder()
        .model(
            ModelBuilder::new("res.country")
                .field(FieldDescriptor::char("name").required())
                .field(FieldDescriptor::char("code")),
        )
        .model(
            ModelBuilder::new("res.partner.category")
                .field(FieldDescriptor::char("name"))
                .field(FieldDescriptor::many2one("parent_id", "res.partner.category")),
        )
        .model(
            ModelBuilder::new("res.partner")
                .field(FieldDescriptor::char("name"))
                .field(FieldDescriptor::char("city"))
                .field(FieldDescriptor::many2one("country_id", "res.country").bypass_access())
                .field(FieldDescriptor::many2many("category_ids", "res.partner.category"))
                .field(FieldDescriptor::scalar("active", ValueType::Boolean))
                .field(FieldDescriptor::char("secret").groups(["base.group_system"]))
                .field(FieldDescriptor::char("country_code").related("country_id.code"))
                .field(FieldDescriptor::scalar("is_vip", ValueType::Boolean).computed_with_search(vip_search)),
        )
        .model(ModelBuilder::new("sale.tag").field(FieldDescriptor::char("name")))
        .model(
            ModelBuilder::new("sale.order")
                .order("name desc")
                .field(FieldDescriptor::char("name").required())
                .field(FieldDescriptor::many2one("partner_id", "res.partner"))
                .field(FieldDescriptor::many2one("invoice_partner_id", "res.partner").bypass_access())
                .field(FieldDescriptor::scalar("amount", ValueType::Float))
                .field(FieldDescriptor::scalar("state", ValueType::Selection))
                .field(FieldDescriptor::scalar("confirmed", ValueType::Boolean))
                .field(FieldDescriptor::one2many("line_ids", "sale.order.line", "order_id"))
                .field(FieldDescriptor::many2many("tag_ids", "sale.tag"))
                .field(FieldDescriptor::property("props"))
                .field(FieldDescriptor::scalar("description", ValueType::Text).translatable())
                .field(FieldDescriptor::char("partner_city").related("partner_id.city"))
                .field(FieldDescriptor::scalar("attachment", ValueType::Binary))
                .field(FieldDescriptor::char("display_label").computed()),
        )
        .model(
            ModelBuilder::new("sale.order.line")
                .rec_name("product")
                .field(FieldDescriptor::many2one("order_id", "sale.order").required())
                .field(FieldDescriptor::char("product"))
                .field(FieldDescriptor::scalar("qty", ValueType::Integer))
                .field(FieldDescriptor::scalar("price", ValueType::Float)),
        )
        .build()
        .expect("fixture registry is valid")
}
